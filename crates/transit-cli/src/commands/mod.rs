pub mod init;
pub mod read;
pub mod readers;
pub mod scenario;
pub mod select;

use std::path::PathBuf;

use transit_card::sim::{SimulatedReader, SimulatedSecurityModule};
use transit_card::{
    ActiveCard, CardReader, CardRepository, NoSecurityModule, PcscContext, SecurityModule,
    TransitConfig,
};
use transit_common::ProductType;

/// Options shared by every card command
pub struct Options {
    pub simulate: Option<ProductType>,
    pub reader: Option<String>,
    pub config: Option<PathBuf>,
}

pub type Repository = CardRepository<Box<dyn CardReader>, Box<dyn SecurityModule>>;

pub(crate) fn load_config(options: &Options) -> Option<TransitConfig> {
    let config = match &options.config {
        Some(path) => TransitConfig::load(path),
        None => TransitConfig::from_env(),
    };
    match config {
        Ok(config) => Some(config),
        Err(err) => {
            eprintln!("Failed to load configuration: {}", err);
            None
        }
    }
}

/// Connect to the card, or to the simulator when asked to.
///
/// PC/SC readers come without a security module: secure cards can be
/// selected but not opened.
pub(crate) fn connect(options: &Options) -> Option<(Box<dyn CardReader>, Box<dyn SecurityModule>)> {
    if let Some(product) = options.simulate {
        println!("Reader: simulated {}\n", product.label());
        let reader: Box<dyn CardReader> = Box::new(SimulatedReader::blank(product));
        let security: Box<dyn SecurityModule> = Box::new(SimulatedSecurityModule::default());
        return Some((reader, security));
    }

    let context = match PcscContext::establish() {
        Ok(context) => context,
        Err(err) => {
            eprintln!("Failed to establish PC/SC context: {}", err);
            return None;
        }
    };

    let reader = match &options.reader {
        Some(name) => context.connect(name),
        None => context.connect_first(),
    };
    match reader {
        Ok(reader) => {
            println!("Reader: {}\n", reader.name());
            let reader: Box<dyn CardReader> = Box::new(reader);
            let security: Box<dyn SecurityModule> = Box::new(NoSecurityModule);
            Some((reader, security))
        }
        Err(err) => {
            eprintln!("Failed to connect to card: {}", err);
            eprintln!("Please ensure a card is present on the reader");
            None
        }
    }
}

pub(crate) fn open_repository(options: &Options) -> Option<Repository> {
    let config = load_config(options)?;
    let (reader, security) = connect(options)?;
    match CardRepository::from_config(reader, security, &config) {
        Ok(repository) => Some(repository),
        Err(err) => {
            eprintln!("Invalid configuration: {}", err);
            None
        }
    }
}

/// Select the card and print what was found.
pub(crate) fn select_card(repository: &mut Repository) -> Option<ActiveCard> {
    match repository.select_card() {
        Ok(active) => {
            println!("Card: {} ({:?} family)", active.product.label(), active.family());
            if let Some(df_name) = &active.df_name {
                println!("  DF name: {}", hex::encode_upper(df_name));
            }
            if let Some(serial) = &active.serial_number {
                println!("  Serial number: {}", hex::encode_upper(serial));
            }
            println!();
            Some(active)
        }
        Err(err) => {
            eprintln!("Card selection failed: {}", err);
            None
        }
    }
}
