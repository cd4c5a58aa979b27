use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use wbr::{ChartFilters, FilterRequest, Settings};

#[derive(Parser)]
#[command(name = "wbr", about = "Weekly Business Review analytics CLI")]
struct Cli {
    /// Increase logging verbosity (overrides --log-level)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

/// Reference date and filter selections shared by chart and page commands.
#[derive(Args)]
struct FilterArgs {
    /// Reference date (YYYY-MM-DD, default: today)
    #[arg(long)]
    date: Option<String>,
    /// Shopping code (sigla)
    #[arg(long)]
    shopping: Option<String>,
    /// RGM ramo (applies to RGM charts only)
    #[arg(long)]
    ramo: Option<String>,
    /// RGM categoria (applies to RGM charts only)
    #[arg(long)]
    categoria: Option<String>,
    /// RGM loja (applies to RGM charts only)
    #[arg(long)]
    loja: Option<String>,
}

impl FilterArgs {
    fn into_request(self) -> FilterRequest {
        FilterRequest {
            data_referencia: self.date,
            shopping: self.shopping,
            ramo: self.ramo,
            categoria: self.categoria,
            loja: self.loja,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the WBR series for one chart
    Generate {
        chart_id: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Generate every chart on a page
    Page {
        page_id: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Print a page configuration document
    PageConfig { page_id: String },
    /// List filter options, optionally narrowed by earlier selections
    FilterOptions {
        #[arg(long)]
        shopping: Option<String>,
        #[arg(long)]
        ramo: Option<String>,
        #[arg(long)]
        categoria: Option<String>,
    },
    /// List reference dates that have data
    AvailableDates,
    /// Instagram followers, engagement and reach for one day
    InstagramKpis {
        /// Reference date (YYYY-MM-DD)
        #[arg(long)]
        date: String,
        #[arg(long)]
        shopping: Option<String>,
    },
    /// Best performing Instagram posts
    InstagramTopPosts {
        /// Restrict to the month of this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        shopping: Option<String>,
        #[arg(long, default_value_t = wbr::options::DEFAULT_TOP_POSTS)]
        limit: u32,
    },
    /// Check database connectivity
    TestConnection,
    /// Drop every cached result
    CacheClear,
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        bind: SocketAddr,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => match cli.settings.log_level() {
            wbr::logger::Level::Debug => "debug",
            wbr::logger::Level::Info => "info",
            wbr::logger::Level::Warning => "warn",
            wbr::logger::Level::Error | wbr::logger::Level::Critical => "error",
        },
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let service = wbr::factory::create_service(&cli.settings).await?;

    match cli.command {
        Commands::Generate { chart_id, filters } => {
            let request = filters.into_request();
            let chart_filters =
                ChartFilters::resolve_for_chart(service.executor(), &request, &chart_id).await?;
            let result = service
                .generate(&chart_id, chart_filters.as_ref(), request.data_referencia.as_deref())
                .await?;
            print_json(&result)?;
        }
        Commands::Page { page_id, filters } => {
            let request = filters.into_request();
            let chart_filters = ChartFilters::resolve(service.executor(), &request).await?;
            let result = service
                .generate_page(&page_id, &chart_filters, request.data_referencia.as_deref())
                .await?;
            print_json(&result)?;
        }
        Commands::PageConfig { page_id } => {
            print_json(&service.page_config(&page_id)?)?;
        }
        Commands::FilterOptions {
            shopping,
            ramo,
            categoria,
        } => {
            if shopping.is_none() && ramo.is_none() && categoria.is_none() {
                print_json(&wbr::options::filter_options(service.executor()).await?)?;
            } else {
                let narrowed = wbr::options::filtered_options(
                    service.executor(),
                    shopping.as_deref(),
                    ramo.as_deref(),
                    categoria.as_deref(),
                )
                .await?;
                print_json(&narrowed)?;
            }
        }
        Commands::AvailableDates => {
            print_json(&wbr::options::available_dates(service.executor()).await?)?;
        }
        Commands::InstagramKpis { date, shopping } => {
            let kpis =
                wbr::options::instagram_kpis(service.executor(), Some(&date), shopping.as_deref())
                    .await?;
            print_json(&kpis)?;
        }
        Commands::InstagramTopPosts {
            date,
            shopping,
            limit,
        } => {
            let posts = wbr::options::instagram_top_posts(
                service.executor(),
                date.as_deref(),
                shopping.as_deref(),
                limit,
            )
            .await?;
            print_json(&posts)?;
        }
        Commands::TestConnection => {
            if service.executor().test_connection().await {
                println!("Database connection OK");
            } else {
                anyhow::bail!("database connection failed");
            }
        }
        Commands::CacheClear => {
            service.cache().clear().await?;
            println!("Cache cleared");
        }
        Commands::Serve { bind } => {
            wbr::http::serve(Arc::new(service), bind).await?;
        }
    }

    Ok(())
}
