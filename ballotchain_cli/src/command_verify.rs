use super::expand;
use ballotchain::*;

pub fn command_verify(matches: &clap::ArgMatches) {
    // Unwrap is OK, INPUT is required
    let filename = expand(matches.value_of("INPUT").unwrap());

    let file_bytes = std::fs::read(&filename).unwrap_or_else(|e| {
        eprintln!("ballotchain verify: unable to read {}: {}", filename, e);
        std::process::exit(1);
    });

    let entries = Entry::list_from_bytes(&file_bytes).unwrap_or_else(|e| {
        eprintln!("ballotchain verify: unable to read {}: {}", filename, e);
        std::process::exit(1);
    });

    let scheme = match entries.first() {
        Some(genesis) => match serde_cbor::from_slice::<ElectionConfig>(&genesis.payload) {
            Ok(config) => config.scheme,
            Err(e) => {
                eprintln!("ballotchain verify: first entry is not an election: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            eprintln!("ballotchain verify: no entries in {}", filename);
            std::process::exit(1);
        }
    };

    let report = match scheme {
        SchemeKind::Dummy => audit::<DummyScheme>(&entries),
        SchemeKind::ElGamal => audit::<ElGamalScheme>(&entries),
    };

    match report {
        Ok(report) => {
            println!("> Election verified OK");
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("ballotchain verify: {}", e),
            }
        }
        Err(e) => {
            eprintln!("ballotchain verify: {}", e);
            std::process::exit(1);
        }
    }
}
