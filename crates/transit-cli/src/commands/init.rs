use super::{open_repository, select_card, Options};

pub fn cmd_init(options: &Options) {
    let Some(mut repository) = open_repository(options) else {
        return;
    };
    let Some(active) = select_card(&mut repository) else {
        return;
    };

    match repository.init_card(&active) {
        Ok(report) => {
            println!("Card personalized");
            println!("  Commands sent: {}", report.commands);
            println!("  Structures written: {}", report.writes);
        }
        Err(err) => eprintln!("Failed to personalize card: {}", err),
    }
}
