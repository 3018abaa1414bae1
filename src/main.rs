use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use widget_preview_cache::{
    CacheConfig, ComponentName, PreviewLoader, PreviewSize, PreviewSource, PreviewStore,
    ShortcutActivity, StaticPackageRegistry, TilePreviewGenerator, UserId, WidgetProvider,
};

/// Inspect and maintain the widget preview cache
#[derive(Parser, Debug)]
#[command(name = "widget-previews", version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Preview database, overrides the config
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored previews
    List,

    /// Drop previews of packages that are gone or were upgraded
    Sweep {
        /// JSON manifest of installed packages
        #[arg(long)]
        manifest: PathBuf,
    },

    /// Drop every preview of a package for one user
    Remove {
        package: String,
        #[arg(long, default_value_t = 0)]
        user: u64,
    },

    /// Load or render one preview and save it as PNG
    Render {
        /// JSON manifest of installed packages
        #[arg(long)]
        manifest: PathBuf,
        /// Component, `package/class` or `package/.Class`
        component: ComponentName,
        #[arg(long, default_value = "160x160")]
        size: PreviewSize,
        /// Render as a shortcut instead of a widget
        #[arg(long)]
        shortcut: bool,
        #[arg(long, default_value_t = 0)]
        user: u64,
        #[arg(long, default_value_t = 1)]
        span_x: u32,
        #[arg(long, default_value_t = 1)]
        span_y: u32,
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CacheConfig::load(path)?,
        None => CacheConfig::load_or_default()?,
    };
    if let Some(database) = cli.database {
        config.database_path = Some(database);
    }

    let db_path = config.resolved_database_path()?;
    let store = PreviewStore::open(&db_path)
        .with_context(|| format!("opening preview database {}", db_path.display()))?;

    match cli.command {
        Command::List => {
            for (user, package, stamp) in store.scan_all()? {
                let updated = DateTime::<Utc>::from_timestamp_millis(stamp.last_update_time)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>4}  {:<48}  v{:<8}  {}",
                    user, package, stamp.version_code, updated
                );
            }
        }
        Command::Sweep { manifest } => {
            let packages = Arc::new(StaticPackageRegistry::load_manifest(&manifest)?);
            let loader = PreviewLoader::new(
                &config,
                store,
                packages,
                Arc::new(TilePreviewGenerator::new(config.render)),
            )?;

            let report = loader.sweep_in_background().await;
            println!(
                "✅ Scanned {} previews, removed {} packages ({} rows)",
                report.scanned, report.packages_removed, report.rows_deleted
            );
        }
        Command::Remove { package, user } => {
            let loader = PreviewLoader::new(
                &config,
                store,
                Arc::new(StaticPackageRegistry::new()),
                Arc::new(TilePreviewGenerator::new(config.render)),
            )?;

            let deleted = loader.remove_package(&package, UserId(user));
            println!("🗑️  Deleted {} previews of {}", deleted, package);
        }
        Command::Render {
            manifest,
            component,
            size,
            shortcut,
            user,
            span_x,
            span_y,
            out,
        } => {
            let packages = Arc::new(StaticPackageRegistry::load_manifest(&manifest)?);
            let loader = PreviewLoader::new(
                &config,
                store,
                packages,
                Arc::new(TilePreviewGenerator::new(config.render)),
            )?;

            let source = if shortcut {
                PreviewSource::Shortcut(ShortcutActivity {
                    component,
                    icon: None,
                })
            } else {
                PreviewSource::Widget(WidgetProvider {
                    provider: component,
                    user: UserId(user),
                    span_x,
                    span_y,
                    preview: None,
                    icon: None,
                })
            };

            let image = loader.request_preview(source, size).wait().await?;
            image
                .save(&out)
                .with_context(|| format!("writing {}", out.display()))?;

            let stats = loader.stats();
            info!(
                renders = stats.renders,
                disk_hits = stats.disk_hits,
                "preview written to {}",
                out.display()
            );
        }
    }

    Ok(())
}
