use super::expand;
use ballotchain::{IdentityKey, TrusteeSecret};
use ed25519_dalek::Keypair;
use rand::rngs::OsRng;
use std::fs::File;
use std::io::prelude::*;

pub fn command_keygen(matches: &clap::ArgMatches) {
    match matches.value_of("trustee") {
        Some(name) => command_keygen_trustee(matches, name),
        None => {
            let mut csprng = OsRng {};
            let keypair = Keypair::generate(&mut csprng);

            println!("secret-key: {}", hex::encode(keypair.secret.to_bytes()));
            println!("public-key: {}", hex::encode(keypair.public.to_bytes()));
            println!("identity-key: {}", IdentityKey::generate().to_hex());
        }
    }
}

fn command_keygen_trustee(matches: &clap::ArgMatches, name: &str) {
    // Unwrap is OK, --trustee requires --secret
    let secret_location = expand(matches.value_of("secret").unwrap());

    let secret = TrusteeSecret::generate();
    let descriptor = secret.descriptor(name).unwrap_or_else(|e| {
        eprintln!("ballotchain keygen: {}", e);
        std::process::exit(1);
    });

    let mut file = File::create(&secret_location).unwrap_or_else(|e| {
        eprintln!(
            "ballotchain keygen: cannot create file {}: {}",
            &secret_location, e
        );
        std::process::exit(1);
    });

    file.write_all(secret.to_hex().as_bytes()).unwrap_or_else(|e| {
        eprintln!(
            "ballotchain keygen: unable to write secret to {}: {}",
            &secret_location, e
        );
        std::process::exit(1);
    });

    match serde_json::to_string_pretty(&descriptor) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("ballotchain keygen: {}", e);
            std::process::exit(1);
        }
    }
}
