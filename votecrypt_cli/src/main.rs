use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use votecrypt::*;

/// Seal, open and tally encrypted ballots
#[derive(Parser, Debug)]
#[command(name = "votecrypt", version)]
struct Args {
    /// Directory holding the key file, ballot log and voter roll.
    /// Defaults to VOTECRYPT_DATA_DIR, or the current directory.
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the election keypair, generating it if needed, and print the public key
    Keygen,

    /// Check whether a voter may vote
    Check { voter_id: String },

    /// Cast a vote for the candidate at the given (zero-based) position
    Vote {
        voter_id: String,
        candidate_index: usize,
    },

    /// Decrypt every ballot and print the votes, totals and winners
    Tally {
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete all ballots and mark every voter as not having voted
    Reset,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Keygen => "keygen",
            Command::Check { .. } => "check",
            Command::Vote { .. } => "vote",
            Command::Tally { .. } => "tally",
            Command::Reset => "reset",
        }
    }
}

fn main() {
    let args = Args::parse();

    let log_level: tracing::Level = args.log_level.parse().unwrap_or(tracing::Level::WARN);
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(stderr_layer).init();

    let name = args.command.name();
    if let Err(e) = run(args) {
        eprintln!("votecrypt {}: {}", name, e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Error> {
    let mut config = Config::from_env()?;
    if let Some(dir) = args.data_dir {
        let defaults = Config::in_dir(dir);
        config.key_path = defaults.key_path;
        config.votes_path = defaults.votes_path;
        config.voters_path = defaults.voters_path;
    }

    let election = Election::from_config(&config);
    election.roll().seed_if_missing(&DEFAULT_VOTERS)?;

    match args.command {
        Command::Keygen => command_keygen(&election),
        Command::Check { voter_id } => command_check(&election, &voter_id),
        Command::Vote {
            voter_id,
            candidate_index,
        } => command_vote(&election, &voter_id, candidate_index),
        Command::Tally { json } => command_tally(&election, json),
        Command::Reset => command_reset(&election),
    }
}

type FileElection = Election<FileKeyStore, FileBallotLog, FileVoterRoll>;

fn command_keygen(election: &FileElection) -> Result<(), Error> {
    let public = election.keypair()?.public_key();
    println!("public-key-e: {}", public.e);
    println!("public-key-n: {}", public.n);
    Ok(())
}

fn command_check(election: &FileElection, voter_id: &str) -> Result<(), Error> {
    match election.check_voter(voter_id)? {
        VoterCheck::Unknown => println!("Voter ID not found."),
        VoterCheck::AlreadyVoted => println!("You have already voted."),
        VoterCheck::Eligible { candidates } => {
            println!("Candidates:");
            for (i, candidate) in candidates.iter().enumerate() {
                println!("  [{}] {}", i, candidate);
            }
        }
    }
    Ok(())
}

fn command_vote(election: &FileElection, voter_id: &str, candidate_index: usize) -> Result<(), Error> {
    election.cast_vote(voter_id, candidate_index)?;
    println!("Vote submitted successfully!");
    Ok(())
}

fn command_tally(election: &FileElection, json: bool) -> Result<(), Error> {
    let report = election.tally()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Votes:");
    for opening in &report.plaintexts {
        println!("  {}", opening);
    }

    println!("Tally:");
    for (candidate, num_votes) in &report.tally {
        println!("  {} got {} votes", candidate, num_votes);
    }

    println!("Results:");
    match report.winners.as_slice() {
        [] => println!("  No votes were counted"),
        [winner] => println!("  The winner is {}", winner),
        winners => println!("  Tie between {}", winners.join(", ")),
    }
    Ok(())
}

fn command_reset(election: &FileElection) -> Result<(), Error> {
    election.reset()?;
    println!("All votes cleared and voter statuses reset.");
    Ok(())
}
