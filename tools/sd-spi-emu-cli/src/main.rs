use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use sd_spi_emu::{
    CacheMode, Cid, Csd, Device, DeviceConfig, FileStore, IoStats, BLOCK_SIZE,
};

mod hexdump;

#[derive(Debug, Parser)]
#[command(name = "sd-spi-emu")]
#[command(about = "Inspect and modify emulated SD card images")]
struct Cli {
    #[command(flatten)]
    card: CardArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Args)]
struct CardArgs {
    /// Card image file (created on first use).
    #[arg(long, global = true, default_value = "sd_card.img")]
    image: PathBuf,

    /// JSON device configuration; flags below override its fields.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Card capacity in 512-byte blocks.
    #[arg(long, global = true, value_name = "BLOCKS")]
    capacity_blocks: Option<u32>,

    /// Bypass the single-block write-back cache.
    #[arg(long, global = true)]
    direct: bool,

    #[arg(long, global = true, value_name = "PIN")]
    chip_select_pin: Option<u8>,
}

impl CardArgs {
    fn device_config(&self) -> Result<DeviceConfig> {
        let mut cfg = match &self.config {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("read config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parse config {}", path.display()))?
            }
            None => DeviceConfig::default(),
        };
        if let Some(blocks) = self.capacity_blocks {
            cfg.capacity_blocks = blocks;
        }
        if self.direct {
            cfg.cache = CacheMode::Direct;
        }
        if let Some(pin) = self.chip_select_pin {
            cfg.chip_select_pin = pin;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn open(&self) -> Result<(DeviceConfig, Device<FileStore>)> {
        let cfg = self.device_config()?;
        let dev = Device::initialize(&cfg, FileStore::new(&self.image))
            .with_context(|| format!("initialize card on {}", self.image.display()))?;
        Ok((cfg, dev))
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the image (or grow it to the configured capacity).
    Init,

    /// Print configuration and the CID/CSD registers.
    Info {
        #[arg(long)]
        json: bool,
    },

    /// Hex-dump blocks exactly as they sit in the image.
    Dump {
        #[arg(long)]
        block: u32,

        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Write bytes into one block.
    Write {
        #[arg(long)]
        block: u32,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[command(flatten)]
        payload: Payload,
    },

    /// Read bytes from one block through the card.
    Read {
        #[arg(long)]
        block: u32,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long, default_value_t = BLOCK_SIZE)]
        len: usize,
    },

    /// Zero a range of blocks.
    Erase {
        /// Erase the whole card.
        #[arg(long, conflicts_with_all = ["start", "end"])]
        all: bool,

        #[arg(long, requires = "end")]
        start: Option<u32>,

        /// Exclusive end block.
        #[arg(long, requires = "start")]
        end: Option<u32>,
    },
}

#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
struct Payload {
    /// UTF-8 text to write.
    #[arg(long)]
    text: Option<String>,

    /// Hex-encoded bytes to write.
    #[arg(long)]
    hex: Option<String>,
}

impl Payload {
    fn bytes(&self) -> Result<Vec<u8>> {
        match (&self.text, &self.hex) {
            (Some(text), _) => Ok(text.as_bytes().to_vec()),
            (None, Some(encoded)) => hex::decode(encoded.trim()).context("decode --hex payload"),
            (None, None) => bail!("one of --text or --hex is required"),
        }
    }
}

#[derive(Debug, Serialize)]
struct CardInfo<'a> {
    image: &'a Path,
    config: &'a DeviceConfig,
    capacity_bytes: u64,
    cid: Cid,
    csd: Csd,
    stats: IoStats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let (cfg, mut dev) = cli.card.open()?;

    match cli.command {
        Commands::Init => {
            println!(
                "initialized {} ({} blocks, {} bytes)",
                cli.card.image.display(),
                cfg.capacity_blocks,
                cfg.capacity_bytes()
            );
        }
        Commands::Info { json } => {
            let cid = dev.read_identification()?;
            let csd = dev.read_configuration()?;
            let info = CardInfo {
                image: &cli.card.image,
                config: &cfg,
                capacity_bytes: cfg.capacity_bytes(),
                cid,
                csd,
                stats: dev.stats(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_info(&info);
            }
        }
        Commands::Dump { block, count } => {
            let end = block.checked_add(count).context("block range overflows")?;
            for b in block..end {
                let image = dev
                    .dump_block(b)
                    .with_context(|| format!("dump block {b}"))?;
                println!("block {b} (byte {})", u64::from(b) * BLOCK_SIZE as u64);
                print!("{}", hexdump::format_block(u64::from(b) * BLOCK_SIZE as u64, &image));
            }
        }
        Commands::Write {
            block,
            offset,
            payload,
        } => {
            let data = payload.bytes()?;
            dev.write(block, &data, offset)
                .with_context(|| format!("write block {block}"))?;
            dev.flush().context("flush card")?;
            tracing::info!(block, offset, len = data.len(), "wrote block");
            println!("wrote {} bytes to block {block} at offset {offset}", data.len());
        }
        Commands::Read { block, offset, len } => {
            let mut buf = vec![0u8; len];
            dev.read(block, &mut buf, offset)
                .with_context(|| format!("read block {block}"))?;
            let base = u64::from(block) * BLOCK_SIZE as u64 + offset as u64;
            print!("{}", hexdump::format_block(base, &buf));
        }
        Commands::Erase { all, start, end } => {
            let (start, end) = match (all, start, end) {
                (true, _, _) => (0, dev.card_capacity_blocks()),
                (false, Some(start), Some(end)) => (start, end),
                _ => bail!("pass --all or both --start and --end"),
            };
            dev.erase_range(start, end)
                .with_context(|| format!("erase blocks {start}..{end}"))?;
            println!("erased blocks {start}..{end}");
        }
    }

    Ok(())
}

fn print_info(info: &CardInfo<'_>) {
    let cache = match info.config.cache {
        CacheMode::Direct => "direct",
        CacheMode::WriteBack => "write-back",
    };
    println!("image:            {}", info.image.display());
    println!(
        "capacity:         {} blocks ({} bytes)",
        info.config.capacity_blocks, info.capacity_bytes
    );
    println!("cache:            {cache}");
    println!("chip select pin:  {}", info.config.chip_select_pin);
    println!(
        "cid:              mid={:#04x} oid={} pnm={} prv={:#04x} psn={:#010x} mdt={}/{}",
        info.cid.mid,
        String::from_utf8_lossy(&info.cid.oid),
        info.cid.product_name(),
        info.cid.prv,
        info.cid.psn,
        info.cid.mdt_month,
        2000 + u32::from(info.cid.mdt_year),
    );
    println!(
        "csd:              c_size={:#x} ({} blocks) read_bl_len={} write_bl_len={}",
        info.csd.c_size,
        info.csd.capacity_blocks(),
        info.csd.read_bl_len,
        info.csd.write_bl_len,
    );
    println!("cid bytes:        {}", hex::encode(info.cid.to_bytes()));
    println!("csd bytes:        {}", hex::encode(info.csd.to_bytes()));
}
