//! gxnet CLI - station graphs and network inspection from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Station coordinates -> forward/backward transition matrices
//! gxnet transition stations.json --sigma 50000 --threshold 0.01 -o transition.json
//!
//! # Parameter shapes and count for a configuration
//! gxnet summary config.json
//!
//! # One forward pass on seeded random input
//! gxnet forward config.json --batch 4 --transition transition.json
//! ```
//!
//! Set `RUST_LOG=debug` (or pass `--verbose`) for library logs on stderr.

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use clap::{Parser, Subcommand};
use gxnet_nn::init::num_parameters;
use gxnet_nn::transform::transition_pair;
use gxnet_nn::{GxNet, GxNetConfig};
use gxnet_station::{distance_matrix, gaussian_adjacency, Station};
use ndarray::Array2;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gxnet")]
#[command(about = "Station graph reconstruction network CLI", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build transition matrices from station coordinates
    Transition {
        /// Station list (JSON array of {id, lon, lat})
        input: PathBuf,

        /// Output file (JSON {forward, backward})
        #[arg(short, long)]
        output: PathBuf,

        /// Gaussian kernel width in metres
        #[arg(long, default_value = "50000")]
        sigma: f64,

        /// Drop edges with weight below this value
        #[arg(long, default_value = "0.01")]
        threshold: f64,
    },

    /// Show parameter shapes for a network configuration
    Summary {
        /// Network configuration (JSON)
        config: PathBuf,
    },

    /// Run one forward pass on random input
    Forward {
        /// Network configuration (JSON)
        config: PathBuf,

        /// Batch size
        #[arg(short, long, default_value = "1")]
        batch: usize,

        /// Transition matrices from `gxnet transition` (default: identity)
        #[arg(short, long)]
        transition: Option<PathBuf>,

        /// Seed for the random input
        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

/// On-disk transition matrices.
#[derive(Debug, Serialize, Deserialize)]
struct TransitionFile {
    forward: Vec<Vec<f32>>,
    backward: Vec<Vec<f32>>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("gxnet_nn=debug,gxnet_station=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Transition {
            input,
            output,
            sigma,
            threshold,
        } => cmd_transition(&input, &output, sigma, threshold),
        Commands::Summary { config } => cmd_summary(&config),
        Commands::Forward {
            config,
            batch,
            transition,
            seed,
        } => cmd_forward(&config, batch, transition.as_deref(), seed),
    }
}

fn load_config(path: &Path) -> Result<GxNetConfig> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let config: GxNetConfig = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

fn load_stations(path: &Path) -> Result<Vec<Station>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let stations: Vec<Station> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse stations {}", path.display()))?;
    if stations.is_empty() {
        bail!("No stations in {}", path.display());
    }
    Ok(stations)
}

fn load_transitions(path: &Path, nodes: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file: TransitionFile = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse transitions {}", path.display()))?;
    Ok((
        rows_to_tensor(&file.forward, nodes, device).context("forward matrix")?,
        rows_to_tensor(&file.backward, nodes, device).context("backward matrix")?,
    ))
}

fn rows_to_tensor(rows: &[Vec<f32>], nodes: usize, device: &Device) -> Result<Tensor> {
    if rows.len() != nodes || rows.iter().any(|r| r.len() != nodes) {
        bail!("expected a {nodes}x{nodes} matrix");
    }
    let data: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(Tensor::from_vec(data, (nodes, nodes), device)?)
}

fn array_to_tensor(a: &Array2<f64>, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = a.iter().map(|&v| v as f32).collect();
    Ok(Tensor::from_vec(data, a.dim(), device)?)
}

fn cmd_transition(input: &Path, output: &Path, sigma: f64, threshold: f64) -> Result<()> {
    let stations = load_stations(input)?;
    let device = Device::Cpu;

    let dist = distance_matrix(&stations);
    let adj = gaussian_adjacency(dist.view(), sigma, threshold)?;
    let edges = adj.iter().filter(|&&w| w > 0.0).count() - stations.len();

    let (forward, backward) = transition_pair(&array_to_tensor(&adj, &device)?)?;
    let file = TransitionFile {
        forward: forward.to_vec2()?,
        backward: backward.to_vec2()?,
    };
    fs::write(output, serde_json::to_string_pretty(&file)?)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Stations: {}", stations.len());
    println!("Edges:    {}", edges);
    println!("Wrote {}", output.display());
    Ok(())
}

fn cmd_summary(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let device = Device::Cpu;
    let eye = Tensor::eye(config.num_nodes, DType::F32, &device)?;

    let varmap = VarMap::new();
    GxNet::new(config.clone(), &eye, &eye, &varmap, &device)?;

    println!("GxNet Summary");
    println!("=============");
    println!(
        "Nodes: {}  Input: {}  Hidden: {}  Output: {}  Depth: {}  Order: {}",
        config.num_nodes,
        config.input_dim,
        config.hidden_dim,
        config.output_dim,
        config.depth,
        config.order
    );
    println!();

    {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| anyhow!("variable map lock poisoned"))?;
        let mut names: Vec<&String> = data.keys().collect();
        names.sort();
        for name in names {
            println!("{:<24} {:?}", name, data[name].dims());
        }
    }

    println!();
    println!("Total parameters: {}", num_parameters(&varmap));
    Ok(())
}

fn cmd_forward(path: &Path, batch: usize, transition: Option<&Path>, seed: u64) -> Result<()> {
    if batch == 0 {
        bail!("batch must be positive");
    }
    let config = load_config(path)?;
    let device = Device::Cpu;
    let n = config.num_nodes;

    let (a_q, a_h) = match transition {
        Some(file) => load_transitions(file, n, &device)
            .with_context(|| format!("Invalid transitions {}", file.display()))?,
        None => {
            let eye = Tensor::eye(n, DType::F32, &device)?;
            (eye.clone(), eye)
        }
    };

    let varmap = VarMap::new();
    let net = GxNet::new(config.clone(), &a_q, &a_h, &varmap, &device)?;

    let mut rng = XorShiftRng::seed_from_u64(seed);
    let len = batch * config.input_dim * n;
    let data: Vec<f32> = (0..len).map(|_| StandardNormal.sample(&mut rng)).collect();
    let x = Tensor::from_vec(data, (batch, config.input_dim, n), &device)?;

    let start = Instant::now();
    let out = net.forward(&x)?;
    info!(elapsed = ?start.elapsed(), "forward pass");

    let values = out.flatten_all()?.to_vec1::<f32>()?;
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    println!("Input shape:  {:?}", x.dims());
    println!("Output shape: {:?}", out.dims());
    println!("Range:        [{:.4}, {:.4}]", min, max);
    Ok(())
}
