use crate::formatters::{format_card, FormatMode};

use super::{open_repository, select_card, Options};

pub fn cmd_read(options: &Options, format_mode: FormatMode) {
    let Some(mut repository) = open_repository(options) else {
        return;
    };
    let Some(active) = select_card(&mut repository) else {
        return;
    };

    match repository.read_card(&active) {
        Ok(card) => format_card(&card, active.family(), format_mode),
        Err(err) => eprintln!("Failed to read card: {}", err),
    }
}
