use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use scriptoon::api::{AspectRatio, HttpJobClient, OutputFormat, OutputImage, Resolution};
use scriptoon::editor::{AnnotationFrame, OverlayEditor};
use scriptoon::job::{CancelToken, JobEvent, JobSession, PollConfig, RecoveryOutcome};
use scriptoon::library::ImageLibrary;
use scriptoon::logging;
use scriptoon::prefs::{delete_credential, save_credential, GenerationPrefs};
use scriptoon::prompts::PromptPresets;
use scriptoon::references::ReferenceSet;
use scriptoon::settings::Settings;
use scriptoon::store::FileStore;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;

#[derive(Parser, Debug)]
#[command(
    name = "scriptoon",
    version,
    about = "Generate images through a remote job queue and annotate the results"
)]
struct Cli {
    #[arg(long, default_value = "settings.json")]
    settings: String,
    #[arg(long, action = ArgAction::SetTrue)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a generation and wait for the results.
    Generate(GenerateArgs),
    /// Pick up a generation interrupted by a previous run.
    Resume,
    #[command(subcommand)]
    Key(KeyCommand),
    /// Mask regions of an image and export it at full resolution.
    Annotate(AnnotateArgs),
    #[command(subcommand)]
    Prompts(PromptsCommand),
    #[command(subcommand)]
    Library(LibraryCommand),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Falls back to the last used prompt.
    prompt: Option<String>,
    #[arg(long)]
    count: Option<u8>,
    #[arg(long)]
    aspect: Option<AspectRatio>,
    #[arg(long)]
    resolution: Option<Resolution>,
    #[arg(long)]
    format: Option<OutputFormat>,
    /// Replaces the saved reference images.
    #[arg(long = "reference")]
    references: Vec<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    no_references: bool,
}

#[derive(Subcommand, Debug)]
enum KeyCommand {
    Set { value: String },
    Delete,
}

#[derive(Args, Debug)]
struct AnnotateArgs {
    source: String,
    /// `x,y,width,height[,degrees]` in display-canvas units.
    #[arg(long = "frame", value_parser = parse_frame)]
    frames: Vec<AnnotationFrame>,
    #[arg(long, default_value_t = 1024.0)]
    container_width: f64,
    #[arg(long, default_value_t = 1024.0)]
    container_height: f64,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum PromptsCommand {
    List,
    Set {
        /// 1-based slot.
        slot: usize,
        text: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    Apply {
        slot: usize,
        #[arg(default_value = "")]
        prompt: String,
    },
}

#[derive(Subcommand, Debug)]
enum LibraryCommand {
    List,
    Add { paths: Vec<PathBuf> },
    Remove { index: usize },
    /// Copy a library image into the reference set.
    Promote { index: usize },
}

fn parse_frame(raw: &str) -> Result<AnnotationFrame, String> {
    let values = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("invalid frame '{raw}': {err}"))?;
    match values.as_slice() {
        [x, y, w, h] => Ok(AnnotationFrame::new(*x, *y, *w, *h)),
        [x, y, w, h, degrees] => {
            let mut frame = AnnotationFrame::new(*x, *y, *w, *h);
            frame.rotation = degrees.to_radians();
            Ok(frame)
        }
        _ => Err(format!("expected x,y,width,height[,degrees], got '{raw}'")),
    }
}

fn print_event(event: JobEvent) {
    match event {
        JobEvent::Status(msg) => println!("{msg}"),
        JobEvent::Progress(line) => println!("  {line}"),
        JobEvent::Displayed(images) => print_images(&images),
        JobEvent::Warning(msg) => eprintln!("warning: {msg}"),
        JobEvent::Failed(msg) => eprintln!("error: {msg}"),
        JobEvent::Cancelled => println!("generation cancelled"),
        JobEvent::TimedOut => eprintln!("error: generation timed out"),
    }
}

fn print_images(images: &[OutputImage]) {
    let stamp = chrono::Utc::now().timestamp_millis();
    for (index, image) in images.iter().enumerate() {
        println!("{} {}", image.download_name(stamp, index), image.url);
    }
}

type Session = JobSession<FileStore, HttpJobClient>;

/// Session whose events are printed from a separate thread. The thread ends
/// once the session is dropped.
fn spawn_session(settings: &Settings, store: FileStore) -> Result<(Session, JoinHandle<()>)> {
    let client = HttpJobClient::from_settings(settings)?;
    let (tx, rx) = mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            print_event(event);
        }
    });
    let session = JobSession::new(store, client, PollConfig::from(settings)).with_events(tx);
    watch_interrupts(session.cancel_token(), tokio::signal::ctrl_c);
    Ok((session, printer))
}

/// First interrupt cancels the generation at its next checkpoint, a second
/// one quits right away.
fn watch_interrupts<F, Fut>(token: CancelToken, mut interrupt: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = io::Result<()>>,
{
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(%err, "failed to start interrupt watcher");
                return;
            }
        };
        runtime.block_on(async move {
            if let Err(err) = interrupt().await {
                tracing::error!(%err, "failed to install Ctrl+C handler");
                return;
            }
            tracing::info!("received Ctrl+C, cancelling generation");
            eprintln!("cancelling, press Ctrl+C again to quit");
            token.cancel();
            if interrupt().await.is_ok() {
                std::process::exit(130);
            }
        });
    })
}

fn finish(session: Session, printer: JoinHandle<()>) {
    drop(session);
    let _ = printer.join();
}

fn generate(settings: &Settings, mut store: FileStore, args: GenerateArgs) -> Result<()> {
    let mut prefs = GenerationPrefs::load(&store);
    if let Some(prompt) = args.prompt {
        prefs.prompt = prompt;
    }
    if let Some(count) = args.count {
        prefs.count = count;
    }
    if let Some(aspect) = args.aspect {
        prefs.aspect_ratio = aspect;
    }
    if let Some(resolution) = args.resolution {
        prefs.resolution = resolution;
    }
    if let Some(format) = args.format {
        prefs.output_format = format;
    }
    if let Err(err) = prefs.save(&mut store) {
        tracing::warn!(%err, "could not save generation preferences");
    }

    let mut references = ReferenceSet::load(&store);
    if !args.references.is_empty() {
        references.clear();
        let added = references.add_files(&args.references);
        if added < args.references.len() {
            eprintln!(
                "warning: using {added} of {} reference images",
                args.references.len()
            );
        }
        if let Err(err) = references.save(&mut store) {
            tracing::warn!(%err, "could not save reference images");
        }
    }
    let attached = if args.no_references {
        Vec::new()
    } else {
        references.images().to_vec()
    };

    let (mut session, printer) = spawn_session(settings, store)?;
    let result = session.generate(prefs.to_params(), &attached);
    finish(session, printer);
    result?;
    Ok(())
}

fn resume(settings: &Settings, store: FileStore) -> Result<()> {
    let (mut session, printer) = spawn_session(settings, store)?;
    let outcome = session.recover();
    finish(session, printer);
    match outcome? {
        RecoveryOutcome::NoRecord => println!("nothing to resume"),
        RecoveryOutcome::Expired => println!("previous generation expired"),
        RecoveryOutcome::AlreadyDisplayed => println!("previous generation was already shown"),
        RecoveryOutcome::Discarded => println!("previous generation had no saved results"),
        RecoveryOutcome::Replayed(_) | RecoveryOutcome::Resumed(_) => {}
        RecoveryOutcome::PreviousFailure { .. } => {}
    }
    Ok(())
}

fn annotate(settings: &Settings, args: AnnotateArgs) -> Result<()> {
    let mut editor = OverlayEditor::new();
    editor.open(&args.source, (args.container_width, args.container_height))?;
    for frame in args.frames {
        editor.insert_frame(frame);
    }
    let exported = editor.export()?;
    let dir = args
        .out
        .unwrap_or_else(|| PathBuf::from(&settings.export_dir));
    let path = exported.save_to(&dir)?;
    println!("{}", path.display());
    Ok(())
}

fn prompts(mut store: FileStore, command: PromptsCommand) -> Result<()> {
    let mut presets = PromptPresets::load(&store);
    match command {
        PromptsCommand::List => {
            for (index, slot) in presets.slots().iter().enumerate() {
                println!("{}. {}: {}", index + 1, presets.label(index), slot.text);
            }
        }
        PromptsCommand::Set { slot, text, name } => {
            presets.set(slot_index(slot)?, name, text)?;
            presets.save(&mut store)?;
        }
        PromptsCommand::Apply { slot, prompt } => {
            println!("{}", presets.apply(slot_index(slot)?, &prompt)?);
        }
    }
    Ok(())
}

/// Slots are numbered from 1 on the command line.
fn slot_index(slot: usize) -> Result<usize> {
    slot.checked_sub(1)
        .ok_or_else(|| anyhow!("prompt slots are numbered from 1"))
}

fn library(mut store: FileStore, command: LibraryCommand) -> Result<()> {
    let mut library = ImageLibrary::load(&store);
    match command {
        LibraryCommand::List => {
            for (index, image) in library.images().iter().enumerate() {
                println!(
                    "{index}: {}x{} {} KB ({})",
                    image.width, image.height, image.size_kb, image.id
                );
            }
            return Ok(());
        }
        LibraryCommand::Add { paths } => {
            for path in &paths {
                match library.add_file(path) {
                    Ok(image) => println!("added {} ({} KB)", path.display(), image.size_kb),
                    Err(err) => eprintln!("skipped {}: {err:#}", path.display()),
                }
            }
        }
        LibraryCommand::Remove { index } => {
            library.remove(index)?;
        }
        LibraryCommand::Promote { index } => {
            let mut references = ReferenceSet::load(&store);
            library.promote_to_reference(index, &mut references)?;
            references.save(&mut store)?;
            return Ok(());
        }
    }
    library.save(&mut store)?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.settings)?;
    let _log_guard = logging::init(
        cli.debug || settings.debug_logging,
        settings.log_dir.as_deref().map(Path::new),
    );

    let open_store =
        || FileStore::open(&settings.store_path).with_context(|| format!("open {}", settings.store_path));

    match cli.command {
        Commands::Generate(args) => generate(&settings, open_store()?, args),
        Commands::Resume => resume(&settings, open_store()?),
        Commands::Key(KeyCommand::Set { value }) => {
            let mut store = open_store()?;
            save_credential(&mut store, &value).map_err(|err| anyhow!("{err}"))?;
            println!("API key saved");
            Ok(())
        }
        Commands::Key(KeyCommand::Delete) => {
            let mut store = open_store()?;
            delete_credential(&mut store);
            println!("API key deleted");
            Ok(())
        }
        Commands::Annotate(args) => annotate(&settings, args),
        Commands::Prompts(command) => prompts(open_store()?, command),
        Commands::Library(command) => library(open_store()?, command),
    }
}
