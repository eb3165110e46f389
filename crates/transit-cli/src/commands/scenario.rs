use std::path::Path;

use transit_card::CardSelector;

use super::{connect, load_config, Options};

fn write_output(bytes: &[u8], output: Option<&Path>) {
    match output {
        Some(path) => match std::fs::write(path, bytes) {
            Ok(()) => println!("Written to {}", path.display()),
            Err(err) => eprintln!("Failed to write {}: {}", path.display(), err),
        },
        None => println!("{}", String::from_utf8_lossy(bytes)),
    }
}

fn read_input(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            eprintln!("Failed to read {}: {}", path.display(), err);
            None
        }
    }
}

pub fn cmd_export(options: &Options, output: Option<&Path>) {
    let Some(config) = load_config(options) else {
        return;
    };
    match config.selector().export_scenario() {
        Ok(bytes) => write_output(&bytes, output),
        Err(err) => eprintln!("Failed to export scenario: {}", err),
    }
}

pub fn cmd_capture(options: &Options, scenario: &Path, output: Option<&Path>) {
    let Some(raw) = read_input(scenario) else {
        return;
    };
    let selector = match CardSelector::from_exported(&raw) {
        Ok(selector) => selector,
        Err(err) => {
            eprintln!("Invalid scenario: {}", err);
            return;
        }
    };
    let Some((mut reader, _)) = connect(options) else {
        return;
    };

    let captured = match selector.capture(reader.as_mut()) {
        Ok(captured) => captured,
        Err(err) => {
            eprintln!("Capture failed: {}", err);
            return;
        }
    };
    match captured.to_bytes() {
        Ok(bytes) => write_output(&bytes, output),
        Err(err) => eprintln!("Failed to serialize capture: {}", err),
    }
}

pub fn cmd_resolve(options: &Options, captured: &Path) {
    let Some(config) = load_config(options) else {
        return;
    };
    let Some(raw) = read_input(captured) else {
        return;
    };

    match config.selector().resolve_from_captured(&raw) {
        Ok(active) => {
            println!("Card: {} ({:?} family)", active.product.label(), active.family());
            if let Some(df_name) = &active.df_name {
                println!("  DF name: {}", hex::encode_upper(df_name));
            }
        }
        Err(err) => eprintln!("Resolution failed: {}", err),
    }
}
