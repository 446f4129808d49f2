// uiscope CLI - attach to a JVM and capture GUI snapshots
//
// The thin frontend driver for the introspection engine: attach, upload
// the agent payload, capture one snapshot per window, print the
// component tree, optionally dump JSON and PPM images.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uiscope_core::{
    Bitmap, ComponentTree, NodeId, PayloadArchive, ServiceKind, Session, Snapshot, WireConnection,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toolkit {
    Awt,
    Fx,
}

impl From<Toolkit> for ServiceKind {
    fn from(toolkit: Toolkit) -> Self {
        match toolkit {
            Toolkit::Awt => ServiceKind::Awt,
            Toolkit::Fx => ServiceKind::Fx,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "uiscope", about = "Capture GUI snapshots from a live JVM")]
struct Args {
    /// Target host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Debug wire port of the target JVM
    #[arg(long)]
    port: u16,

    /// Which toolkit to introspect
    #[arg(long, value_enum, default_value = "awt")]
    toolkit: Toolkit,

    /// Agent payload archive; without it only the slow path is available
    #[arg(long)]
    agent: Option<PathBuf>,

    /// Directory for PPM image dumps
    #[arg(long)]
    out: Option<PathBuf>,

    /// Print the component trees as JSON
    #[arg(long)]
    json: bool,

    /// Resolve owning fields for custom components
    #[arg(long)]
    fields: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("uiscope_core=info".parse().unwrap())
                .add_directive("uiscope_wire=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let kind: ServiceKind = args.toolkit.into();

    let wire = Arc::new(
        WireConnection::attach(&args.host, args.port)
            .await
            .with_context(|| format!("attaching to {}:{}", args.host, args.port))?,
    );

    let version = wire.vm_version().await?;
    info!("attached to {} ({})", version.vm_name, version.vm_version);

    let session = Session::new(wire);

    let Some(access) = session.dispatch_thread(kind).await? else {
        bail!(
            "no {} dispatch thread found in the target",
            kind.dispatch_thread_name()
        );
    };
    info!("using dispatch thread {:#x}", access.id);

    if let Some(path) = &args.agent {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let archive = PayloadArchive::parse(&bytes)?;
        match session.upload_service_classes(&access, kind, &archive).await? {
            Some(_) => info!("agent payload uploaded, fast path available"),
            None => warn!("agent upload unavailable, falling back to the slow path"),
        }
    }

    let mut snapshots = session.capture(&access, kind).await?;
    if snapshots.is_empty() {
        bail!("the target has no visible windows");
    }

    if args.fields {
        for snapshot in &mut snapshots {
            session
                .resolve_field_owners(&access, kind, &mut snapshot.tree)
                .await?;
        }
    }

    for (index, snapshot) in snapshots.iter().enumerate() {
        print_snapshot(index, snapshot);

        if args.json {
            println!("{}", serde_json::to_string_pretty(&snapshot.tree)?);
        }

        if let (Some(dir), Some(image)) = (&args.out, &snapshot.image) {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(format!("window-{}.ppm", index));
            write_ppm(image, &path)?;
            info!("wrote {}", path.display());
        }
    }

    session.close().await;
    Ok(())
}

fn print_snapshot(index: usize, snapshot: &Snapshot) {
    let size = snapshot
        .image
        .as_ref()
        .map(|image| format!("{}x{}", image.width, image.height))
        .unwrap_or_else(|| "no image".to_string());
    println!("window {}: \"{}\" ({})", index, snapshot.title, size);
    print_node(&snapshot.tree, snapshot.tree.root(), 1);
}

fn print_node(tree: &ComponentTree, id: NodeId, depth: usize) {
    let node = tree.node(id);
    let mut line = format!(
        "{}{} [{}] {}x{}+{}+{}",
        "  ".repeat(depth),
        node.name,
        node.type_name,
        node.bounds.width,
        node.bounds.height,
        node.window_bounds.x,
        node.window_bounds.y,
    );
    if let Some(text) = &node.text {
        line.push_str(&format!(" \"{}\"", text));
    }
    if let Some(owner) = &node.field_owner {
        line.push_str(&format!(" (field {})", owner.field));
    }
    if !node.visible {
        line.push_str(" (hidden)");
    }
    println!("{}", line);

    for child in &node.children {
        print_node(tree, *child, depth + 1);
    }
}

/// Binary PPM (P6), alpha dropped.
fn write_ppm(image: &Bitmap, path: &std::path::Path) -> Result<()> {
    let mut out = Vec::with_capacity(32 + image.pixels.len() * 3);
    out.extend_from_slice(format!("P6\n{} {}\n255\n", image.width, image.height).as_bytes());
    for pixel in &image.pixels {
        out.push((pixel >> 16) as u8);
        out.push((pixel >> 8) as u8);
        out.push(*pixel as u8);
    }
    std::fs::write(path, out)?;
    Ok(())
}
