//! Card formatters for raw and human-readable output

use clap::ValueEnum;
use transit_common::{
    encode, Card, CardFamily, CodecError, Content, Contract, Environment, Event, Frame, Structure,
};

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatMode {
    /// Raw hex output
    Raw,
    /// Human-readable formatted output
    Human,
}

impl FormatMode {
    pub fn description(&self) -> &'static str {
        match self {
            FormatMode::Raw => "Raw",
            FormatMode::Human => "Human-Readable",
        }
    }
}

/// Print every structure of a card read
pub fn format_card(card: &Card, family: CardFamily, mode: FormatMode) {
    let frame = match family {
        CardFamily::Secure => Frame::SecureRecord,
        CardFamily::Memory => Frame::MemoryStructure,
    };
    println!("=== Card ({}) ===\n", mode.description());

    println!("Environment:");
    print_structure(&card.environment, frame, mode, format_environment);

    for slot in &card.contracts {
        println!("\nContract {}:", slot.number);
        print_structure(&slot.contract, frame, mode, format_contract);
        println!("  Counter: {}", slot.counter);
    }

    println!("\nEvent:");
    print_structure(&card.event, frame, mode, format_event);
}

fn print_structure<S: Structure>(
    decoded: &Result<Content<S>, CodecError>,
    frame: Frame,
    mode: FormatMode,
    human: fn(&S) -> Vec<String>,
) {
    match decoded {
        Err(err) => println!("  Corrupt: {}", err),
        Ok(Content::Uninitialized) => println!("  (blank)"),
        Ok(content @ Content::Present(value)) => match mode {
            FormatMode::Raw => println!("  {}", hex::encode_upper(encode(content, frame))),
            FormatMode::Human => {
                for line in human(value) {
                    println!("  {}", line);
                }
            }
        },
    }
}

fn format_environment(environment: &Environment) -> Vec<String> {
    let mut lines = vec![
        format!("Version: {}", environment.version.get()),
        format!("Application number: {}", environment.application_number),
        format!("Issued: {}", environment.issuing_date),
        format!("Valid until: {}", environment.end_date),
    ];
    match environment.holder {
        Some(holder) => lines.push(format!(
            "Holder: company {} / id {}",
            holder.company, holder.id_number
        )),
        None => lines.push("Holder: anonymous".to_string()),
    }
    lines
}

fn format_contract(contract: &Contract) -> Vec<String> {
    vec![
        format!("Version: {}", contract.version.get()),
        format!("Tariff: {}", contract.tariff.label()),
        format!("Sold: {}", contract.sale_date),
        format!("Valid until: {}", contract.validity_end_date),
        format!("Sale SAM: {:08X}", contract.sale_sam),
        format!("Sale counter: {}", contract.sale_counter),
    ]
}

fn format_event(event: &Event) -> Vec<String> {
    let priorities: Vec<&str> = event.priorities.iter().map(|p| p.label()).collect();
    vec![
        format!("Version: {}", event.version.get()),
        format!("Date: {} {}", event.date_stamp, event.time_stamp),
        format!("Location: {:08X}", event.location),
        format!("Contract used: {}", event.contract_used),
        format!("Priorities: {}", priorities.join(", ")),
    ]
}
