use super::{open_repository, select_card, Options};

pub fn cmd_select(options: &Options) {
    let Some(mut repository) = open_repository(options) else {
        return;
    };
    if let Some(active) = select_card(&mut repository) {
        println!("Contracts: {}", active.product.contract_count());
    }
}
