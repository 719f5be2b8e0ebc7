use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use zkmail_circuit::{join_limbs, CircuitConfig, CircuitDefinition, CircuitInputs};
use zkmail_dkim::{
    parse_header_fields, split_message, DkimSignature, KeyResolver, RawEmail, StaticKeyResolver,
    DEFAULT_RESOLVE_TIMEOUT,
};
use zkmail_prover::{CancelToken, PaymentClaim, Pipeline, ProofArtifact, ProvingBackend};

#[derive(Parser, Debug)]
#[command(name = "zkmail")]
#[command(about = "prove a DKIM signed payment email", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct CircuitArgs {
    /// circuit definition json (defaults to the built-in circuit)
    #[arg(long, env = "ZKMAIL_CIRCUIT")]
    circuit: Option<PathBuf>,

    /// circuit config json (defaults to the standard shape)
    #[arg(long, env = "ZKMAIL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct EmailArgs {
    /// raw email (.eml)
    #[arg(long)]
    eml: PathBuf,

    /// DKIM key TXT record to use instead of DNS
    #[arg(long)]
    key_record: Option<PathBuf>,

    /// only accept signatures from this domain
    #[arg(long)]
    domain: Option<String>,

    /// convert bare LF line endings to CRLF first
    #[arg(long)]
    crlf: bool,

    /// key lookup timeout in seconds
    #[arg(long, default_value_t = DEFAULT_RESOLVE_TIMEOUT.as_secs())]
    key_timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// verify DKIM and produce a proof artifact
    Prove {
        #[command(flatten)]
        email: EmailArgs,

        #[command(flatten)]
        circuit: CircuitArgs,

        /// where to write the artifact (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,

        /// write json instead of the binary encoding
        #[arg(long)]
        json: bool,
    },
    /// check a proof artifact
    Verify {
        /// artifact, binary or json
        #[arg(long)]
        proof: PathBuf,

        #[command(flatten)]
        circuit: CircuitArgs,
    },
    /// print DKIM fields, circuit sizes and the payment claim
    Inspect {
        #[command(flatten)]
        email: EmailArgs,

        #[command(flatten)]
        circuit: CircuitArgs,
    },
    /// write the standard circuit definition
    Circuit {
        #[command(flatten)]
        circuit: CircuitArgs,

        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zkmail=info,zkmail_prover=info,zkmail_dkim=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Prove {
            email,
            circuit,
            out,
            json,
        } => prove(email, circuit, out, json).await,
        Command::Verify { proof, circuit } => verify(&proof, circuit),
        Command::Inspect { email, circuit } => inspect(email, circuit).await,
        Command::Circuit { circuit, out } => write_circuit(circuit, out),
    }
}

fn load_config(args: &CircuitArgs) -> Result<CircuitConfig> {
    match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Ok(CircuitConfig::from_json(&json)?)
        }
        None => Ok(CircuitConfig::default()),
    }
}

fn load_circuit(args: &CircuitArgs, config: &CircuitConfig) -> Result<Arc<CircuitDefinition>> {
    let circuit = match &args.circuit {
        Some(path) => CircuitDefinition::load(path, config)?,
        None => CircuitDefinition::standard(config),
    };
    Ok(Arc::new(circuit))
}

fn read_email(args: &EmailArgs) -> Result<RawEmail> {
    let bytes = std::fs::read(&args.eml).with_context(|| format!("reading {}", args.eml.display()))?;
    let raw = RawEmail::new(bytes);
    Ok(if args.crlf {
        raw.normalize_line_endings()
    } else {
        raw
    })
}

/// (domain, selector) of every DKIM-Signature in the message
fn signature_targets(raw: &RawEmail) -> Result<Vec<(String, String)>> {
    let (header, _) = split_message(raw.as_bytes())?;
    let mut targets = Vec::new();
    for field in parse_header_fields(header)? {
        if !field.name_eq("DKIM-Signature") {
            continue;
        }
        match DkimSignature::parse(&String::from_utf8_lossy(field.value)) {
            Ok(sig) => targets.push((sig.domain, sig.selector)),
            Err(e) => warn!("skipping unparsable DKIM-Signature: {}", e),
        }
    }
    Ok(targets)
}

fn resolver_for(args: &EmailArgs, raw: &RawEmail) -> Result<Arc<dyn KeyResolver>> {
    if let Some(path) = &args.key_record {
        let record = std::fs::read_to_string(path)
            .with_context(|| format!("reading key record {}", path.display()))?;
        let mut resolver = StaticKeyResolver::new();
        for (domain, selector) in signature_targets(raw)? {
            info!("using {} for {}._domainkey.{}", path.display(), selector, domain);
            resolver.insert(&domain, &selector, record.trim());
        }
        return Ok(Arc::new(resolver));
    }
    dns_resolver()
}

#[cfg(feature = "dns")]
fn dns_resolver() -> Result<Arc<dyn KeyResolver>> {
    Ok(Arc::new(zkmail_dkim::DnsKeyResolver::from_system_conf()?))
}

#[cfg(not(feature = "dns"))]
fn dns_resolver() -> Result<Arc<dyn KeyResolver>> {
    bail!("built without dns support, pass --key-record")
}

#[cfg(not(feature = "risc0"))]
fn backend() -> Arc<dyn ProvingBackend> {
    Arc::new(zkmail_prover::CommitmentBackend::new())
}

#[cfg(feature = "risc0")]
fn backend() -> Arc<dyn ProvingBackend> {
    Arc::new(zkmail_prover::Risc0Backend::new())
}

fn pipeline(email: &EmailArgs, circuit: &CircuitArgs, raw: &RawEmail) -> Result<Pipeline> {
    let config = load_config(circuit)?;
    let definition = load_circuit(circuit, &config)?;
    let mut pipeline = Pipeline::new(
        definition,
        config,
        backend(),
        resolver_for(email, raw)?,
    )?
    .with_key_timeout(Duration::from_secs(email.key_timeout));
    if let Some(domain) = &email.domain {
        pipeline = pipeline.with_expected_domain(domain.clone());
    }
    Ok(pipeline)
}

fn write_output(out: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
            info!("wrote {} ({} bytes)", path.display(), bytes.len());
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(bytes)?;
        }
    }
    Ok(())
}

async fn prove(email: EmailArgs, circuit: CircuitArgs, out: Option<PathBuf>, json: bool) -> Result<()> {
    let raw = read_email(&email)?;
    let pipeline = pipeline(&email, &circuit, &raw)?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling proof");
            on_signal.cancel();
        }
    });

    let artifact = pipeline.run(&raw, &cancel).await?;
    info!(
        "proof ready: nullifier {} pubkey {}",
        hex::encode(artifact.public_inputs.email_nullifier),
        hex::encode(artifact.public_inputs.pubkey_hash)
    );

    let bytes = if json {
        artifact.to_json()?.into_bytes()
    } else {
        artifact.to_bytes()?
    };
    write_output(out.as_deref(), &bytes)
}

fn verify(path: &Path, circuit: CircuitArgs) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let artifact = match ProofArtifact::from_bytes(&bytes) {
        Ok(a) => a,
        Err(_) => ProofArtifact::from_json(std::str::from_utf8(&bytes).context("artifact is neither binary nor json")?)?,
    };

    let config = load_config(&circuit)?;
    let definition = load_circuit(&circuit, &config)?;
    let pipeline = Pipeline::new(
        definition,
        config,
        backend(),
        Arc::new(StaticKeyResolver::new()),
    )?;

    if !pipeline.verify(&artifact)? {
        bail!("proof does not verify");
    }
    println!("{}", serde_json::to_string_pretty(&artifact.statement())?);
    info!("proof verifies");
    Ok(())
}

async fn inspect(email: EmailArgs, circuit: CircuitArgs) -> Result<()> {
    let raw = read_email(&email)?;
    let pipeline = pipeline(&email, &circuit, &raw)?;
    let record = pipeline.extract(&raw).await?;

    let config = pipeline.config();
    let inputs = CircuitInputs::build(&record, config);
    let claim = PaymentClaim::extract(&record);

    let mut report = serde_json::json!({
        "domain": record.domain,
        "selector": record.selector,
        "canonicalization": format!("{:?}", record.canonicalization),
        "modulus_bits": record.modulus_bits(),
        "header_length": record.header.len(),
        "max_header_length": config.max_header_length,
        "body_length": record.body.len(),
        "max_body_length": config.max_body_length,
        "body_hash": String::from_utf8_lossy(record.body_hash_b64()),
        "body_hash_index": record.body_hash_index,
        "dkim_header_sequence": {
            "index": record.dkim_field.index,
            "length": record.dkim_field.length,
        },
    });

    match inputs {
        Ok(inputs) => {
            let modulus = join_limbs(&inputs.pubkey.modulus, config.limb_bits);
            report["limbs"] = serde_json::json!({
                "limb_bits": config.limb_bits,
                "count": inputs.pubkey.modulus.len(),
                "modulus_roundtrips": modulus.to_bytes_be() == record.modulus_bytes(),
            });
        }
        Err(e) => report["circuit_error"] = e.to_string().into(),
    }
    match claim {
        Ok(claim) => {
            report["payment"] = serde_json::to_value(&claim)?;
            report["claim_digest"] = hex::encode(claim.digest()).into();
        }
        Err(e) => report["payment_error"] = e.to_string().into(),
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn write_circuit(circuit: CircuitArgs, out: Option<PathBuf>) -> Result<()> {
    let config = load_config(&circuit)?;
    let definition = CircuitDefinition::standard(&config);
    info!("circuit digest {}", hex::encode(definition.digest()));
    let mut json = definition.to_json()?;
    json.push('\n');
    write_output(out.as_deref(), json.as_bytes())
}
