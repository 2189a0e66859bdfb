use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
mod auth;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tranquil::{CostFactor, LockPolicy, MlockProtector, Protector, Session, crypto, memory};

#[derive(Debug, clap::Args)]
struct ScryptArgs {
    /// JSON file holding the cost factor, e.g. {"N": 15, "r": 8, "p": 1}
    #[arg(long, global = true, value_name = "PATH", env = "TRANQUIL_COST_FILE")]
    cost_file: Option<PathBuf>,

    /// scrypt work-factor exponent, effective N is 2^value (default: 15)
    #[arg(long = "scrypt-n", global = true, env = "TRANQUIL_SCRYPT_N")]
    log_n: Option<u8>,

    /// scrypt block size (default: 8)
    #[arg(long = "scrypt-r", global = true, env = "TRANQUIL_SCRYPT_R")]
    r: Option<u32>,

    /// scrypt parallelism (default: 1)
    #[arg(long = "scrypt-p", global = true, env = "TRANQUIL_SCRYPT_P")]
    p: Option<u32>,
}

impl ScryptArgs {
    /// Flags override the cost file, which overrides the defaults.
    fn to_cost_factor(&self) -> Result<CostFactor> {
        let base = match &self.cost_file {
            Some(path) => {
                let data = fs::read_to_string(path)
                    .with_context(|| format!("failed to read cost file {}", path.display()))?;
                serde_json::from_str(&data)
                    .with_context(|| format!("invalid cost file {}", path.display()))?
            }
            None => CostFactor::default(),
        };

        CostFactor::new(
            self.log_n.unwrap_or(base.log_n()),
            self.r.unwrap_or(base.r()),
            self.p.unwrap_or(base.p()),
        )
        .context("invalid scrypt cost factor")
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LockPolicyArg {
    /// Fail if secret memory cannot be locked
    Required,
    /// Warn and continue if secret memory cannot be locked
    BestEffort,
}

impl From<LockPolicyArg> for LockPolicy {
    fn from(arg: LockPolicyArg) -> Self {
        match arg {
            LockPolicyArg::Required => LockPolicy::Required,
            LockPolicyArg::BestEffort => LockPolicy::BestEffort,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "tranquil")]
#[command(
    version,
    about = "Derive a master key and unlinkable record identifiers from a master password."
)]
struct Cli {
    #[command(flatten)]
    scrypt: ScryptArgs,

    /// What to do when secret memory cannot be locked
    #[arg(
        long,
        global = true,
        value_enum,
        default_value = "required",
        env = "TRANQUIL_LOCK_POLICY"
    )]
    lock_policy: LockPolicyArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Derives record identifiers for an account
    Ids {
        /// Account identifier mixed into the derivation
        #[arg(long, env = "TRANQUIL_IDENTIFIER")]
        identifier: String,

        /// First index to derive
        #[arg(long, default_value_t = 0)]
        start: u32,

        /// Number of identifiers to derive
        #[arg(long, default_value_t = 1)]
        count: u64,

        /// Print a JSON array instead of tab-separated lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Prints the resolved cost factor and its memory use
    Params,

    /// Times derivations and suggests the largest N within a time budget
    Calibrate {
        /// Time budget per derivation in milliseconds
        #[arg(long, default_value_t = 250)]
        target_ms: u64,

        /// Largest exponent to try
        #[arg(long, default_value_t = 22)]
        max_n: u8,
    },
}

fn init_tracing() {
    // TRANQUIL_LOG=tranquil=debug for scrypt timings. Secrets are never logged.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TRANQUIL_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    memory::disable_core_dumps();

    let args = Cli::parse();
    let protector = MlockProtector::shared(args.lock_policy.into());

    match args.command {
        Commands::Ids {
            identifier,
            start,
            count,
            json,
        } => {
            let cost = args.scrypt.to_cost_factor()?;
            let password = auth::read_password()?;
            let session = Session::open_with_protector(
                password.as_bytes(),
                identifier.as_bytes(),
                cost,
                protector,
            )
            .context("failed to derive session secrets")?;
            drop(password);

            let ids = session.identifiers(start).take(count as usize);
            if json {
                let entries: Vec<_> = ids
                    .map(|(n, id)| serde_json::json!({ "n": n, "identifier": id }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for (n, id) in ids {
                    println!("{n}\t{id}");
                }
            }
        }
        Commands::Params => {
            let cost = args.scrypt.to_cost_factor()?;
            let mut out = serde_json::to_value(cost)?;
            out["memory_bytes"] = serde_json::json!(cost.memory_bytes());
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Calibrate { target_ms, max_n } => {
            let base = args.scrypt.to_cost_factor()?;
            calibrate(&protector, base, Duration::from_millis(target_ms), max_n)?;
        }
    }

    Ok(())
}

fn calibrate(protector: &Protector, base: CostFactor, target: Duration, max_n: u8) -> Result<()> {
    let mut best = None;

    println!("{:>3}  {:>12}  {:>8}", "N", "memory", "ms");
    for log_n in 1..=max_n {
        let Ok(cost) = CostFactor::new(log_n, base.r(), base.p()) else {
            break;
        };

        let started = Instant::now();
        crypto::stretch(protector, b"tranquil calibration", cost)
            .with_context(|| format!("derivation failed at N={log_n}"))?;
        let elapsed = started.elapsed();

        println!(
            "{:>3}  {:>12}  {:>8}",
            log_n,
            cost.memory_bytes(),
            elapsed.as_millis()
        );
        if elapsed > target {
            break;
        }
        best = Some(cost);
    }

    let Some(best) = best else {
        bail!("no cost factor finishes within {} ms", target.as_millis());
    };
    info!(log_n = best.log_n(), "calibration finished");
    println!("suggested: {}", serde_json::to_string(&best)?);
    Ok(())
}
