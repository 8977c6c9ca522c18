use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scryptenc::{
    AtomicFile, CostParameters, CostPolicy, Header, VerificationRecord, build_verification_record,
    decrypt_stream, encrypt_stream_with_params, pick_parameters,
};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod auth;
use auth::Stdin;

#[derive(Debug, Parser)]
#[command(name = "scryptenc")]
#[command(
    version,
    about = "Password-based file encryption and password records using scrypt."
)]
struct Cli {
    /// Use at most this many bytes of RAM for key derivation
    #[arg(long, global = true, value_name = "BYTES", env = "SCRYPTENC_MAXMEM")]
    maxmem: Option<u64>,

    /// Use at most this fraction of the available RAM (0 < F <= 0.5)
    #[arg(long, global = true, value_name = "F", env = "SCRYPTENC_MAXMEMFRAC")]
    maxmemfrac: Option<f64>,

    /// Spend at most this many seconds deriving the key
    #[arg(long, global = true, value_name = "SECONDS", env = "SCRYPTENC_MAXTIME")]
    maxtime: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn policy(&self, base: CostPolicy) -> CostPolicy {
        CostPolicy {
            max_memory: self.maxmem.unwrap_or(base.max_memory),
            max_memory_fraction: self.maxmemfrac.unwrap_or(base.max_memory_fraction),
            max_time: self.maxtime.unwrap_or(base.max_time),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Encrypts INPUT (or stdin) to OUTPUT (or stdout)
    Enc {
        input: Option<PathBuf>,
        output: Option<PathBuf>,
        /// Print the selected parameters to stderr
        #[arg(short, long, default_value_t = false)]
        verbose: bool,
    },

    /// Decrypts INPUT (or stdin) to OUTPUT (or stdout)
    Dec {
        input: Option<PathBuf>,
        output: Option<PathBuf>,
    },

    /// Prints the parameters that would be selected on this machine
    Params {
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Writes a password verification record
    #[command(arg_required_else_help = true)]
    Record { output: PathBuf },

    /// Checks a password against a verification record
    #[command(arg_required_else_help = true)]
    Verify { record: PathBuf },

    /// Shows the parameters stored in an encrypted file or record
    #[command(arg_required_else_help = true)]
    Info {
        file: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct ParamsReport {
    log_n: u8,
    n: u64,
    r: u32,
    p: u32,
    memory_required: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
}

impl ParamsReport {
    fn new(params: &CostParameters) -> Self {
        Self {
            log_n: params.log_n(),
            n: params.n(),
            r: params.r(),
            p: params.p(),
            memory_required: params.memory_required(),
            salt: None,
        }
    }

    fn print(&self, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(self)?);
            return Ok(());
        }
        println!("N = {} (2^{}); r = {}; p = {};", self.n, self.log_n, self.r, self.p);
        println!("memory required: {} bytes", self.memory_required);
        if let Some(salt) = &self.salt {
            println!("salt: {salt}");
        }
        Ok(())
    }
}

fn is_stdin(path: &Option<PathBuf>) -> bool {
    path.as_deref().is_none_or(|p| p == Path::new("-"))
}

fn open_input(path: &Option<PathBuf>) -> Result<Box<dyn Read>> {
    match path.as_deref() {
        Some(p) if p != Path::new("-") => Ok(Box::new(
            File::open(p).with_context(|| format!("cannot open input file {}", p.display()))?,
        )),
        _ => Ok(Box::new(io::stdin().lock())),
    }
}

/// Runs `write` against OUTPUT (atomically) or stdout.
fn with_output<F>(path: &Option<PathBuf>, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> scryptenc::Result<()>,
{
    match path.as_deref() {
        Some(p) if p != Path::new("-") => {
            let mut file = AtomicFile::create(p)
                .with_context(|| format!("cannot create output file {}", p.display()))?;
            write(&mut file)?;
            file.commit()?;
        }
        _ => {
            let mut stdout = io::stdout().lock();
            write(&mut stdout)?;
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SCRYPTENC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(args: Cli) -> Result<()> {
    match &args.command {
        Commands::Enc {
            input,
            output,
            verbose,
        } => {
            let stdin = if is_stdin(input) { Stdin::Data } else { Stdin::Free };
            let password = auth::read_new_password_with_confirmation(stdin)?;
            let params = pick_parameters(&args.policy(CostPolicy::default()))?;
            if *verbose {
                eprintln!(
                    "Parameters used: N = {}; r = {}; p = {};",
                    params.n(),
                    params.r(),
                    params.p()
                );
            }
            let reader = open_input(input)?;
            with_output(output, |w| {
                encrypt_stream_with_params(reader, w, password.as_bytes(), &params)
            })?;
        }
        Commands::Dec { input, output } => {
            let stdin = if is_stdin(input) { Stdin::Data } else { Stdin::Free };
            let password = auth::read_password(stdin)?;
            let policy = args.policy(CostPolicy::for_decryption());
            let reader = open_input(input)?;
            with_output(output, |w| {
                decrypt_stream(reader, w, password.as_bytes(), &policy)
            })?;
        }
        Commands::Params { json } => {
            let params = pick_parameters(&args.policy(CostPolicy::default()))?;
            ParamsReport::new(&params).print(*json)?;
        }
        Commands::Record { output } => {
            let password = auth::read_new_password_with_confirmation(Stdin::Free)?;
            let (record, _) =
                build_verification_record(password.as_bytes(), &args.policy(CostPolicy::default()))?;
            scryptenc::storage::write_atomic(output, record.as_bytes())
                .with_context(|| format!("cannot write record {}", output.display()))?;
        }
        Commands::Verify { record } => {
            let data = std::fs::read(record)
                .with_context(|| format!("cannot read record {}", record.display()))?;
            let record = VerificationRecord::from_bytes(&data)?;
            let password = auth::read_password(Stdin::Free)?;
            if !record.verify(password.as_bytes())? {
                return Err(scryptenc::Error::IncorrectPassword.into());
            }
            println!("password ok");
        }
        Commands::Info { file, json } => {
            let mut data = Vec::with_capacity(Header::LEN);
            File::open(file)
                .with_context(|| format!("cannot open {}", file.display()))?
                .take(Header::LEN as u64)
                .read_to_end(&mut data)?;
            let header = Header::parse(&data)?;
            let mut report = ParamsReport::new(&header.params()?);
            report.salt = Some(hex::encode(header.salt()));
            report.print(*json)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let args = Cli::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("scryptenc: {e:#}");
            let code = e
                .downcast_ref::<scryptenc::Error>()
                .map_or(1, scryptenc::Error::code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
