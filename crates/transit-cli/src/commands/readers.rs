use transit_card::PcscContext;

pub fn cmd_readers() {
    let context = match PcscContext::establish() {
        Ok(context) => context,
        Err(err) => {
            eprintln!("Failed to establish PC/SC context: {}", err);
            return;
        }
    };

    match context.list_readers() {
        Ok(readers) if readers.is_empty() => println!("No readers found"),
        Ok(readers) => {
            println!("Found {} reader(s):\n", readers.len());
            for (i, name) in readers.iter().enumerate() {
                println!("  {}: {}", i, name);
            }
        }
        Err(err) => eprintln!("Failed to list readers: {}", err),
    }
}
