use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::info;
use tracing_subscriber::EnvFilter;

use canister_lib::cartridge::Cartridge;
use canister_lib::codec;
use canister_lib::key::DeviceId;
use canister_lib::layout::RECORD_LEN;
use canister_lib::machine::MachineType;
use canister_lib::material;

/// Manage the encrypted 104-byte EEPROM records on Stratasys material
/// canisters.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt a cartridge description into an EEPROM image
    Encode {
        #[command(flatten)]
        identity: Identity,
        /// Treat the input as a raw 104-byte plaintext record instead of JSON
        #[arg(long)]
        raw: bool,
        /// Cartridge JSON (or a raw record with --raw)
        input: PathBuf,
        /// Destination for the encrypted record
        output: PathBuf,
    },
    /// Decrypt an EEPROM image and print the cartridge as JSON
    Decode {
        #[command(flatten)]
        identity: Identity,
        /// Write the decrypted 104-byte record instead of cartridge JSON
        #[arg(long)]
        raw: bool,
        /// Encrypted EEPROM dump
        input: PathBuf,
        /// Destination file; stdout when omitted
        output: Option<PathBuf>,
    },
    /// Build a cartridge description JSON from flags
    Create(CreateArgs),
    /// List known materials
    Materials,
}

#[derive(Args, Debug)]
struct Identity {
    /// Machine type: fox, fox2, ktype, prodigy, quantum, uprint or uprintse
    #[arg(short = 't', long, conflicts_with = "machine_number")]
    machine_type: Option<String>,
    /// Printer serial number as 16 hex digits
    #[arg(short, long)]
    machine_number: Option<String>,
    /// EEPROM unique identifier as 16 hex digits
    #[arg(short, long)]
    eeprom_uid: String,
}

impl Identity {
    fn device(&self) -> Result<DeviceId> {
        let machine_number = match (&self.machine_type, &self.machine_number) {
            (Some(kind), None) => MachineType::from_str(kind)?.number(),
            (None, Some(number)) => parse_hex8(number).context("invalid machine number")?,
            _ => bail!("provide either --machine-type or --machine-number"),
        };
        let eeprom_uid = parse_hex8(&self.eeprom_uid).context("invalid EEPROM uid")?;
        Ok(DeviceId::new(machine_number, eeprom_uid))
    }
}

#[derive(Args, Debug)]
struct CreateArgs {
    /// Material name, e.g. ABS (see `materials`)
    #[arg(short, long)]
    material_name: String,
    /// Manufacturing lot, up to 20 ASCII characters
    #[arg(short = 'l', long)]
    manufacturing_lot: String,
    /// Format "yyyy-mm-dd hh:mm:ss"
    #[arg(short = 'd', long, value_parser = parse_date)]
    manufacturing_date: NaiveDateTime,
    /// Format "yyyy-mm-dd hh:mm:ss"
    #[arg(short = 'u', long, value_parser = parse_date)]
    use_date: NaiveDateTime,
    /// Initial material quantity, in cubic inches
    #[arg(short = 'n', long)]
    initial_material: f64,
    /// Current material quantity, in cubic inches
    #[arg(short = 'c', long)]
    current_material: f64,
    /// Key fragment as 16 hex digits
    #[arg(short, long)]
    key_fragment: String,
    /// Canister serial number
    #[arg(short, long)]
    serial_number: f64,
    /// Record version
    #[arg(long, default_value_t = 1)]
    version: u16,
    /// Destination file; stdout when omitted
    output: Option<PathBuf>,
}

fn parse_hex8(text: &str) -> Result<[u8; 8]> {
    let bytes = hex::decode(text)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("expected 16 hex digits, got {}", text.len()))
}

fn parse_date(text: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
}

fn read_record(path: &Path) -> Result<[u8; RECORD_LEN]> {
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    data.as_slice().try_into().map_err(|_| {
        anyhow!(
            "{} holds {} bytes, expected {}",
            path.display(),
            data.len(),
            RECORD_LEN
        )
    })
}

fn write_text(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("writing {}", path.display()))
        }
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

fn cmd_encode(identity: &Identity, raw: bool, input: &Path, output: &Path) -> Result<()> {
    let device = identity.device()?;
    info!("encoding for {device}");

    let plaintext = if raw {
        read_record(input)?
    } else {
        let text =
            fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
        let cartridge: Cartridge = serde_json::from_str(&text)
            .with_context(|| format!("parsing cartridge JSON from {}", input.display()))?;
        cartridge.pack()?
    };

    let crypted = codec::encode(&device, &plaintext)?;
    fs::write(output, crypted).with_context(|| format!("writing {}", output.display()))?;
    info!("wrote {} bytes to {}", crypted.len(), output.display());
    Ok(())
}

fn cmd_decode(identity: &Identity, raw: bool, input: &Path, output: Option<&Path>) -> Result<()> {
    let device = identity.device()?;
    info!("decoding for {device}");

    let decoded = codec::decode(&device, &read_record(input)?)?;

    if raw {
        match output {
            Some(path) => {
                fs::write(path, decoded.record)
                    .with_context(|| format!("writing {}", path.display()))?;
                info!("wrote {} bytes to {}", decoded.record.len(), path.display());
            }
            None => bail!("--raw needs an output file"),
        }
        return Ok(());
    }

    let cartridge = Cartridge::unpack(&decoded.record)?;
    write_text(output, &serde_json::to_string_pretty(&cartridge)?)
}

fn cmd_create(args: &CreateArgs) -> Result<()> {
    let cartridge = Cartridge {
        serial_number: args.serial_number,
        material_name: args.material_name.clone(),
        manufacturing_lot: args.manufacturing_lot.clone(),
        manufacturing_date: args.manufacturing_date,
        use_date: args.use_date,
        initial_material_quantity: args.initial_material,
        current_material_quantity: args.current_material,
        key_fragment: parse_hex8(&args.key_fragment).context("invalid key fragment")?,
        version: args.version,
    };
    // Packing validates the material name, lot and dates up front.
    cartridge.pack()?;
    write_text(
        args.output.as_deref(),
        &serde_json::to_string_pretty(&cartridge)?,
    )
}

fn cmd_materials() {
    for (id, name) in material::known() {
        println!("{id}\t{name}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(cli.verbose.tracing_level_filter().into())
                .from_env_lossy(),
        )
        .with_target(false)
        .without_time()
        .init();

    match &cli.command {
        Command::Encode {
            identity,
            raw,
            input,
            output,
        } => cmd_encode(identity, *raw, input, output),
        Command::Decode {
            identity,
            raw,
            input,
            output,
        } => cmd_decode(identity, *raw, input, output.as_deref()),
        Command::Create(args) => cmd_create(args),
        Command::Materials => {
            cmd_materials();
            Ok(())
        }
    }
}
