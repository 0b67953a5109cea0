use anyhow::{Context, Result, bail, ensure};
use clap::{Parser, Subcommand};
use memcard_core::card::MemoryCard;
use memcard_core::slot::MemoryCardSlot;
use memcard_core::{CARD_SIZE, SECTOR_COUNT, SECTOR_SIZE, TriState};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::Layer as _;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser, Debug)]
#[command(name = "memcard")]
#[command(about = "a virtual PS1 memory card, driven over its byte protocol", long_about = None)]
struct Args {
    /// Log protocol traffic to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the reply to the Get-Memory-Card-ID command
    Id,
    /// Hex-dump one sector of a card image
    Dump {
        /// Raw 128 KiB card image (a blank card when omitted)
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Sector index, decimal or 0x-prefixed hex
        #[arg(short, long, value_parser = parse_sector)]
        sector: u16,
    },
    /// Fill one sector with a constant byte and save the image
    Fill {
        #[arg(short, long)]
        image: Option<PathBuf>,

        #[arg(short, long, value_parser = parse_sector)]
        sector: u16,

        /// Fill byte, decimal or 0x-prefixed hex
        #[arg(short = 'b', long, value_parser = parse_byte)]
        value: u8,

        /// Where to save the updated image (defaults to --image)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Read the whole card over the protocol and compare with the raw image
    Verify {
        #[arg(short, long)]
        image: PathBuf,
    },
}

fn parse_number(s: &str) -> Result<u64, String> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| e.to_string())
}

fn parse_sector(s: &str) -> Result<u16, String> {
    let value = parse_number(s)?;
    if value >= u64::from(SECTOR_COUNT) {
        return Err(format!("sector index must be below {SECTOR_COUNT}"));
    }
    Ok(value as u16)
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let value = parse_number(s)?;
    u8::try_from(value).map_err(|_| "byte value must fit in 8 bits".to_string())
}

fn load_card(image: Option<&Path>) -> Result<MemoryCard> {
    match image {
        Some(path) => {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            if data.len() != CARD_SIZE {
                bail!(
                    "{} is {} bytes, expected {}",
                    path.display(),
                    data.len(),
                    CARD_SIZE
                );
            }
            Ok(MemoryCard::from_bytes(data.as_slice().try_into().unwrap()))
        }
        None => Ok(MemoryCard::new()),
    }
}

fn run_id() -> Result<()> {
    let card = RefCell::new(MemoryCard::new());
    let mut slot = MemoryCardSlot::new();
    ensure!(slot.insert_card(&card), "card could not be inserted");
    print!("card id:");
    for command in [0x81, 0x53, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00] {
        let mut data: TriState = None;
        slot.send(Some(command), &mut data);
        if let Some(byte) = data {
            print!(" {byte:02X}");
        }
    }
    println!();
    Ok(())
}

fn run_dump(image: Option<&Path>, sector: u16) -> Result<()> {
    let card = RefCell::new(load_card(image)?);
    let mut slot = MemoryCardSlot::new();
    ensure!(slot.insert_card(&card), "card could not be inserted");
    let mut data = [0u8; SECTOR_SIZE];
    slot.read_sector(sector, &mut data)
        .with_context(|| format!("reading sector {sector:#05X}"))?;
    for (row, chunk) in data.chunks(16).enumerate() {
        let offset = usize::from(sector) * SECTOR_SIZE + row * 16;
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '.' })
            .collect();
        println!("{:06X}  {}  |{}|", offset, hex.join(" "), ascii);
    }
    Ok(())
}

fn run_fill(image: Option<&Path>, sector: u16, value: u8, out: Option<&Path>) -> Result<()> {
    let out = out
        .or(image)
        .context("nowhere to save the image: pass --image or --out")?;
    let card = RefCell::new(load_card(image)?);
    let mut slot = MemoryCardSlot::new();
    ensure!(slot.insert_card(&card), "card could not be inserted");
    slot.write_sector(sector, &[value; SECTOR_SIZE])
        .with_context(|| format!("writing sector {sector:#05X}"))?;
    slot.remove_card();
    fs::write(out, card.borrow().bytes())
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!(
        "sector {:#05X} filled with {:02X}, image saved to {}",
        sector,
        value,
        out.display()
    );
    Ok(())
}

fn run_verify(image: &Path) -> Result<()> {
    let raw = fs::read(image).with_context(|| format!("failed to read {}", image.display()))?;
    if raw.len() != CARD_SIZE {
        bail!(
            "{} is {} bytes, expected {}",
            image.display(),
            raw.len(),
            CARD_SIZE
        );
    }
    let card = RefCell::new(MemoryCard::from_bytes(raw.as_slice().try_into().unwrap()));
    let mut slot = MemoryCardSlot::new();
    ensure!(slot.insert_card(&card), "card could not be inserted");
    let mut readback = Box::new([0u8; CARD_SIZE]);
    slot.read_card(&mut readback)
        .context("reading the card over the protocol")?;
    if readback[..] != raw[..] {
        let differing = readback.iter().zip(&raw).filter(|(a, b)| a != b).count();
        bail!("readback differs from the image in {differing} bytes");
    }
    println!("OK: all {CARD_SIZE} bytes read back identical over the protocol");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::WARN
    };
    let targets = tracing_subscriber::filter::Targets::new().with_target("memcard_core", level);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(targets);
    tracing_subscriber::registry().with(fmt_layer).init();

    match args.command {
        Command::Id => run_id(),
        Command::Dump { image, sector } => run_dump(image.as_deref(), sector),
        Command::Fill {
            image,
            sector,
            value,
            out,
        } => run_fill(image.as_deref(), sector, value, out.as_deref()),
        Command::Verify { image } => run_verify(&image),
    }
}
