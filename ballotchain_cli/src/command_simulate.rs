use super::{expand, parse_arg, parse_indices};
use ballotchain::*;
use chrono::{Duration, Utc};
use ed25519_dalek::Keypair;
use log::{debug, info};
use rand::rngs::OsRng;
use rand::Rng;
use std::fs::File;
use std::io::prelude::*;
use std::sync::Arc;

/// What the simulation was asked to do
struct Plan {
    trustees: u32,
    threshold: u32,
    voters: u32,
    options: Vec<String>,
    max_selections: u32,
    misdirect: Vec<u32>,
    bad_share: Vec<u32>,
}

pub fn command_simulate(matches: &clap::ArgMatches) {
    let plan = Plan {
        trustees: parse_arg(matches, "trustees"),
        threshold: parse_arg(matches, "threshold"),
        voters: parse_arg(matches, "voters"),
        options: matches
            .value_of("options")
            .unwrap_or_default()
            .split(',')
            .map(|o| o.trim().to_owned())
            .collect(),
        max_selections: parse_arg(matches, "max-selections"),
        misdirect: parse_indices(matches, "misdirect"),
        bad_share: parse_indices(matches, "bad-share"),
    };

    // Unwrap is OK, scheme has a default and is restricted to known values
    let scheme: SchemeKind = matches.value_of("scheme").unwrap().parse().unwrap_or_else(|e| {
        eprintln!("ballotchain simulate: {}", e);
        std::process::exit(1);
    });

    let result = match scheme {
        SchemeKind::Dummy => simulate::<DummyScheme>(&plan),
        SchemeKind::ElGamal => simulate::<ElGamalScheme>(&plan),
    };
    let entries = result.unwrap_or_else(|e| {
        eprintln!("ballotchain simulate: {}", e);
        std::process::exit(1);
    });

    if let Some(output) = matches.value_of("OUTPUT") {
        let output = expand(output);
        let json = serde_json::to_string_pretty(&entries).unwrap_or_else(|e| {
            eprintln!("ballotchain simulate: {}", e);
            std::process::exit(1);
        });
        let mut file = File::create(&output).unwrap_or_else(|e| {
            eprintln!("ballotchain simulate: cannot create file {}: {}", &output, e);
            std::process::exit(1);
        });
        file.write_all(json.as_bytes()).unwrap_or_else(|e| {
            eprintln!("ballotchain simulate: unable to write {}: {}", &output, e);
            std::process::exit(1);
        });
        println!("> Audit trail of {} entries written to {}", entries.len(), output);
    }
}

fn simulate<S: VotingScheme>(plan: &Plan) -> Result<Vec<Entry>, Error> {
    let mut settings = Settings::from_env()?;
    if settings.identity_key.is_none() {
        debug!("no BALLOTCHAIN_IDENTITY_KEY set, generating one for this run");
        settings.identity_key = Some(IdentityKey::generate());
    }
    let mut csprng = OsRng {};
    let authority = Keypair::generate(&mut csprng);

    // Schedule the election so the ceremony fits before the start
    let now = Utc::now();
    let start = now + Duration::hours(settings.setup_minimum_hours_before_start as i64 + 1);
    let end = start + Duration::hours(12);
    let clock = Arc::new(ManualClock::new(now));
    let board = Arc::new(MemBoard::new());

    let secrets: Vec<TrusteeSecret> = (0..plan.trustees).map(|_| TrusteeSecret::generate()).collect();
    let mut config = ElectionConfig::new(&settings, S::KIND, authority.public, start, end);
    config.title = "Simulated election".into();
    config.options = plan.options.clone();
    config.max_selections = plan.max_selections;
    config.threshold = plan.threshold;
    for (i, secret) in secrets.iter().enumerate() {
        config
            .trustees
            .push(secret.descriptor(&format!("Trustee {}", i + 1))?);
    }
    let id = config.id;

    let engine: ElectionEngine<S> =
        ElectionEngine::new(board.clone(), authority, clock.clone(), settings.clone());
    engine.create_election(config)?;
    println!("> Election {} created ({} scheme)", id, S::KIND);

    let mut trustees = Vec::with_capacity(secrets.len());
    for (i, secret) in secrets.iter().enumerate() {
        let index = i as u32 + 1;
        let mut trustee: Trustee<S> =
            Trustee::new(board.clone(), clock.clone(), &settings, id, secret)?;
        if plan.misdirect.contains(&index) {
            trustee = trustee.with_fault(TrusteeFault::MisdirectedShares);
        } else if plan.bad_share.contains(&index) {
            trustee = trustee.with_fault(TrusteeFault::WrongKeyShare);
        }
        trustees.push(trustee);
    }

    // Key ceremony
    engine.begin_key_ceremony(&id)?;
    let mut progress = engine.advance_key_ceremony(&id)?;
    while !matches!(progress, CeremonyProgress::Complete { .. }) {
        let mut published = false;
        for trustee in trustees.iter() {
            published |= trustee.participate()?;
        }
        let next = engine.advance_key_ceremony(&id)?;
        if !published && next == progress {
            return Err(Error::CeremonyIncomplete);
        }
        progress = next;
    }
    if let CeremonyProgress::Complete {
        qualified,
        disqualified,
    } = &progress
    {
        println!(
            "> Key ceremony complete: qualified {:?}, disqualified {:?}",
            qualified, disqualified
        );
    }

    // Voting
    clock.set(start);
    engine.open_voting(&id)?;

    let mut rng = rand::thread_rng();
    let mut expected = vec![0u64; plan.options.len()];
    for voter in 0..plan.voters {
        let verification = IdentityVerification {
            document_type: "identification_number".into(),
            document_number: format!("{:08}", voter),
        };
        let token = engine.issue_token(&id, &verification)?;

        let picks = rng.gen_range(0, plan.max_selections as usize + 1);
        let mut selections = vec![0u32; plan.options.len()];
        for option in rand::seq::index::sample(&mut rng, plan.options.len(), picks).into_iter() {
            selections[option] = 1;
            expected[option] += 1;
        }
        engine.cast_ballot(&token, &selections)?;
        clock.advance(Duration::seconds(rng.gen_range(1, 60)));
    }
    info!("{} ballots cast", plan.voters);

    // Close and tally
    clock.set(end);
    engine.tick(&id)?;
    for trustee in trustees.iter() {
        trustee.participate()?;
    }
    let tally = engine.tally(&id)?;

    println!("> Tally:");
    for ((option, total), expected) in tally.results.iter().zip(expected.iter()) {
        println!("  {}: {} (expected {})", option, total, expected);
    }
    if !tally.rejected_shares.is_empty() {
        println!("> Rejected decryption shares from trustees {:?}", tally.rejected_shares);
    }
    if tally.results.values().copied().ne(expected.iter().copied()) {
        return Err(Error::AuditMismatch(
            "tally differs from the ballots cast".into(),
        ));
    }

    let report = engine.audit(&id)?;
    println!("> Audit OK: {} entries", report.entries);

    engine.audit_trail(&id)
}
