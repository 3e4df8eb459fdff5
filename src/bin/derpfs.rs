use std::error::Error;

use clap::Parser;
use derpfs::{Operation, Session, cli::Cli};
use log::info;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let op = cli.operation()?;
    let config = cli.config();

    let session = Session::connect(cli.endpoint(), &config)?;
    let closer = session.closer();
    ctrlc::set_handler(move || closer.close())?;

    match op {
        Operation::Create => {
            session.create(&cli.account)?;
            info!("created account {}", cli.account);
        }
        Operation::Read => {
            let data = session.read(&cli.account, &cli.file_name)?;
            println!(
                "read {} bytes into {}",
                data.len(),
                config.local_dir.join(&cli.file_name).display()
            );
        }
        Operation::Write => {
            session.write(&cli.account, &cli.file_name)?;
            info!("wrote {}", cli.file_name);
        }
        Operation::Delete => {
            session.delete(&cli.account, &cli.file_name)?;
            info!("deleted {}", cli.file_name);
        }
        Operation::List => {
            for name in session.list(&cli.account)? {
                println!("{name}");
            }
        }
    }

    session.shutdown();
    Ok(())
}
