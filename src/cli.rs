use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::builder::styling::{AnsiColor, Color, Style, Styles};
use clap::{Args, ColorChoice, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::{Generator, Shell, generate};
use clap_complete_nushell::Nushell;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::capabilities::Capabilities;
use crate::config::{EmbedderBackend, VizConfig};
use crate::pipeline::{
    HealthStatus, Pipeline, VisualizeRequest, VisualizeResponse, embedder_from_config,
};
use crate::{AppError, AppResult};

const STYLES: Styles = Styles::styled()
    .header(Style::new().bold())
    .usage(Style::new().bold())
    .error(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red))))
    .literal(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Green))),
    )
    .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow))))
    .valid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
    .invalid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightRed))))
    .context(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Magenta))))
    .context_value(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
    );

/// Long-form CLI description shown in `--help`.
const LONG_ABOUT: &str = "Lean Embed Viz - Map candidate Lean formalizations by meaning

Given one informal statement and several Lean formalizations of it, this tool:
- embeds every formalization as a vector
- clusters the vectors into 2 and into 4 groups
- projects them to 2D with t-SNE
- draws both clusterings side by side, labelling the most central formalization of each group

The figure is returned as a base64 encoded PNG inside a small JSON envelope.";

/// Lean Embed Viz - Map candidate Lean formalizations by meaning.
#[derive(Parser, Debug, Clone)]
#[command(author, version, propagate_version = true, about, long_about = Some(LONG_ABOUT), styles = STYLES)]
pub struct Cli {
    /// Color choice for the output
    #[arg(long, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Subcommand to run
    #[command(subcommand)]
    pub cmd: Cmd,
}

impl Cli {
    /// Whether log output should carry ANSI colors.
    pub fn ansi(&self) -> bool {
        match self.color {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => std::io::IsTerminal::is_terminal(&std::io::stderr()),
        }
    }
}

/// Top-level commands supported by the CLI.
#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Render the two-panel cluster map for a set of formalizations
    ///
    /// The JSON envelope is written to stdout unless `--output` is given
    Visualize {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        settings: SettingsArgs,
        #[command(flatten)]
        output: OutputArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Report readiness
    Health {
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Generate shell completion for a given shell
    Completion {
        /// Output file to write the completion script to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// The shell to generate the completion for
        #[arg(value_enum)]
        shell: CompletionShell,

        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },
}

/// Supported completion targets for shell auto-completion.
#[derive(ValueEnum, Clone, Debug)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
    Nushell,
}

impl Display for CompletionShell {
    /// Render the canonical shell name string.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompletionShell::Bash => "bash",
            CompletionShell::Zsh => "zsh",
            CompletionShell::Fish => "fish",
            CompletionShell::PowerShell => "powershell",
            CompletionShell::Elvish => "elvish",
            CompletionShell::Nushell => "nushell",
        };
        write!(f, "{}", s)
    }
}

impl Generator for &CompletionShell {
    fn generate(&self, cmd: &clap::builder::Command, buf: &mut dyn Write) {
        match self {
            CompletionShell::Bash => Shell::Bash.generate(cmd, buf),
            CompletionShell::Zsh => Shell::Zsh.generate(cmd, buf),
            CompletionShell::Fish => Shell::Fish.generate(cmd, buf),
            CompletionShell::PowerShell => Shell::PowerShell.generate(cmd, buf),
            CompletionShell::Elvish => Shell::Elvish.generate(cmd, buf),
            CompletionShell::Nushell => Nushell.generate(cmd, buf),
        }
    }

    fn file_name(&self, name: &str) -> String {
        match self {
            CompletionShell::Bash => Shell::Bash.file_name(name),
            CompletionShell::Zsh => Shell::Zsh.file_name(name),
            CompletionShell::Fish => Shell::Fish.file_name(name),
            CompletionShell::PowerShell => Shell::PowerShell.file_name(name),
            CompletionShell::Elvish => Shell::Elvish.file_name(name),
            CompletionShell::Nushell => Nushell.file_name(name),
        }
    }
}

/// Where the statement and formalizations come from.
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// The informal statement being formalized
    #[arg(short, long)]
    pub statement: Option<String>,

    /// A Lean formalization (repeat for each one)
    #[arg(short = 'c', long = "code")]
    pub codes: Vec<String>,

    /// Read a formalization from a file (repeatable, appended after `--code`)
    #[arg(long = "code-file")]
    pub code_files: Vec<PathBuf>,

    /// JSON request `{"informal_statement": ..., "lean_codes": [...]}`; `-` reads stdin
    #[arg(short, long, conflicts_with_all = ["statement", "codes", "code_files"])]
    pub request: Option<PathBuf>,
}

impl InputArgs {
    /// Assemble the request from a request file or from the individual flags.
    pub async fn load(&self) -> AppResult<VisualizeRequest> {
        if let Some(path) = &self.request {
            let data = if path.as_os_str() == "-" {
                let mut data = String::new();
                tokio::io::stdin().read_to_string(&mut data).await?;
                data
            } else {
                tokio::fs::read_to_string(path).await?
            };
            let de = &mut serde_json::Deserializer::from_str(&data);
            return serde_path_to_error::deserialize(de)
                .map_err(|e| AppError::Validation(format!("invalid request: {e}")));
        }

        let mut lean_codes = self.codes.clone();
        for file in &self.code_files {
            lean_codes.push(tokio::fs::read_to_string(file).await?);
        }
        Ok(VisualizeRequest {
            informal_statement: self.statement.clone().unwrap_or_default(),
            lean_codes,
        })
    }
}

/// Overrides applied on top of the configuration files.
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// JSON configuration file layered over the user configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Embedding backend
    #[arg(long, value_enum)]
    pub embedder: Option<EmbedderBackend>,

    /// Figure resolution in dots per inch
    #[arg(long)]
    pub dpi: Option<u32>,

    /// Seed for clustering and projection
    #[arg(long)]
    pub seed: Option<u64>,

    /// TrueType font for all figure text
    #[arg(long)]
    pub font: Option<PathBuf>,
}

impl SettingsArgs {
    pub fn apply(&self, config: &mut VizConfig) {
        if let Some(embedder) = self.embedder {
            config.embedder = embedder;
        }
        if let Some(dpi) = self.dpi {
            config.render.dpi = dpi;
        }
        if let Some(seed) = self.seed {
            config.clustering.seed = seed;
            config.projection.seed = seed;
        }
        if let Some(font) = &self.font {
            config.render.font_path = Some(font.clone());
        }
    }

    /// Defaults, then config files, then these flags.
    pub fn resolve(&self) -> AppResult<VizConfig> {
        let mut config = VizConfig::load(self.config.as_deref())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

/// Where results are written.
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Write the JSON envelope to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also write the decoded PNG to this file
    #[arg(long)]
    pub png: Option<PathBuf>,
}

impl OutputArgs {
    pub async fn write(&self, response: &VisualizeResponse) -> AppResult<()> {
        let json = serde_json::to_string_pretty(response)?;
        match &self.output {
            Some(path) => {
                tokio::fs::write(path, json).await?;
                info!("Wrote response to {}", path.display());
            }
            None => tracing_indicatif::indicatif_println!("{json}"),
        }

        if let (Some(path), Some(image)) = (&self.png, response.plot_image.as_deref()) {
            if image.is_empty() {
                info!("Nothing to visualize, skipping {}", path.display());
            } else {
                tokio::fs::write(path, STANDARD.decode(image)?).await?;
                info!("Wrote figure to {}", path.display());
            }
        }
        Ok(())
    }
}

/// Helper trait for accessing verbosity flags on commands.
pub trait GetVerbosity {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel>;
}

impl GetVerbosity for Cmd {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel> {
        match self {
            Cmd::Visualize { verbosity, .. } => verbosity,
            Cmd::Health { verbosity } => verbosity,
            Cmd::Completion { verbosity, .. } => verbosity,
        }
    }
}

impl Cmd {
    /// Execute the chosen top-level command and return the process exit code.
    #[tracing::instrument(name = "Running command", level = "info", skip(self))]
    pub async fn run(&self) -> AppResult<i32> {
        match self {
            Cmd::Visualize {
                input,
                settings,
                output,
                ..
            } => {
                let config = settings.resolve()?;
                let request = input.load().await?;
                let response = run_visualize(config, request).await?;
                output.write(&response).await?;
                Ok(response.exit_code())
            }
            Cmd::Health { .. } => {
                let health = serde_json::to_string(&HealthStatus::default())?;
                tracing_indicatif::indicatif_println!("{health}");
                Ok(0)
            }
            Cmd::Completion { shell, output, .. } => {
                let mut cmd = Cli::command();
                if let Some(output_path) = output {
                    let mut file = std::fs::OpenOptions::new()
                        .write(true)
                        .truncate(true)
                        .create(true)
                        .open(output_path)?;
                    // Write completion script to the requested file.
                    generate(shell, &mut cmd, "lean-embed-viz", &mut file);
                    info!(
                        "Generated completion script for {} at {}",
                        shell,
                        output_path.display()
                    );
                } else {
                    // Fallback: print completion script to stdout.
                    generate(shell, &mut cmd, "lean-embed-viz", &mut std::io::stdout());
                }
                Ok(0)
            }
        }
    }
}

/// Load the embedder and run the blocking pipeline off the async runtime.
#[tracing::instrument(name = "Visualizing", level = "info", skip_all)]
pub async fn run_visualize(
    config: VizConfig,
    request: VisualizeRequest,
) -> AppResult<VisualizeResponse> {
    match request.validate() {
        Err(e) => return Ok(VisualizeResponse::failed(&e)),
        Ok(None) => {
            info!("No formalizations given, nothing to visualize");
            return Ok(VisualizeResponse::ok(String::new()));
        }
        Ok(Some(_)) => {}
    }
    let caps = Capabilities::detect(&config);
    let embedder = match embedder_from_config(&config, &caps).await {
        Ok(embedder) => embedder,
        Err(e) => return Ok(VisualizeResponse::failed(&e)),
    };
    debug!("Using the {} embedder", embedder.name());
    let response = tokio::task::spawn_blocking(move || {
        Pipeline::with_embedder(embedder, &config).handle(&request)
    })
    .await?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_repeated_codes() {
        let cli = Cli::try_parse_from([
            "lean-embed-viz",
            "visualize",
            "--statement",
            "s",
            "--code",
            "a",
            "-c",
            "b",
            "--dpi",
            "72",
        ])
        .unwrap();
        let Cmd::Visualize {
            input, settings, ..
        } = cli.cmd
        else {
            panic!("expected visualize");
        };
        assert_eq!(input.codes, vec!["a", "b"]);
        assert_eq!(settings.dpi, Some(72));
    }

    #[test]
    fn request_file_conflicts_with_inline_codes() {
        let result = Cli::try_parse_from([
            "lean-embed-viz",
            "visualize",
            "--request",
            "req.json",
            "--code",
            "a",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn flags_override_config() {
        let settings = SettingsArgs {
            embedder: Some(EmbedderBackend::Bert),
            dpi: Some(90),
            seed: Some(7),
            font: Some(PathBuf::from("/tmp/font.ttf")),
            ..SettingsArgs::default()
        };
        let mut config = VizConfig::default();
        settings.apply(&mut config);
        assert_eq!(config.embedder, EmbedderBackend::Bert);
        assert_eq!(config.render.dpi, 90);
        assert_eq!(config.clustering.seed, 7);
        assert_eq!(config.projection.seed, 7);
        assert_eq!(config.render.font_path, Some(PathBuf::from("/tmp/font.ttf")));
    }

    #[tokio::test]
    async fn loads_request_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"informal_statement": "s", "lean_codes": ["a", "b", "c"]}}"#
        )
        .unwrap();
        let input = InputArgs {
            statement: None,
            codes: vec![],
            code_files: vec![],
            request: Some(file.path().to_path_buf()),
        };
        let request = input.load().await.unwrap();
        assert_eq!(request.informal_statement, "s");
        assert_eq!(request.lean_codes.len(), 3);
    }

    #[tokio::test]
    async fn malformed_request_is_a_validation_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"informal_statement": 3}}"#).unwrap();
        let input = InputArgs {
            statement: None,
            codes: vec![],
            code_files: vec![],
            request: Some(file.path().to_path_buf()),
        };
        let err = input.load().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn code_files_are_appended() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "theorem t : True := trivial").unwrap();
        let input = InputArgs {
            statement: Some("s".to_string()),
            codes: vec!["def x := 1".to_string()],
            code_files: vec![file.path().to_path_buf()],
            request: None,
        };
        let request = input.load().await.unwrap();
        assert_eq!(
            request.lean_codes,
            vec!["def x := 1", "theorem t : True := trivial"]
        );
    }

    #[tokio::test]
    async fn writes_envelope_and_png() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = VizConfig::default();
        config.render.dpi = 40;
        let request = VisualizeRequest {
            informal_statement: "The sum of two even numbers is even".to_string(),
            lean_codes: vec!["theorem a : True := trivial".to_string()],
        };
        let response = run_visualize(config, request).await.unwrap();
        assert!(response.success);

        let output = OutputArgs {
            output: Some(dir.path().join("response.json")),
            png: Some(dir.path().join("figure.png")),
        };
        output.write(&response).await.unwrap();
        let json = std::fs::read_to_string(dir.path().join("response.json")).unwrap();
        let parsed: VisualizeResponse = serde_json::from_str(&json).unwrap();
        assert!(parsed.success);
        let png = std::fs::read(dir.path().join("figure.png")).unwrap();
        assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn missing_backend_becomes_a_failed_envelope() {
        if cfg!(feature = "local-ml") {
            return;
        }
        let config = VizConfig {
            embedder: EmbedderBackend::Bert,
            ..VizConfig::default()
        };
        let request = VisualizeRequest {
            informal_statement: "s".to_string(),
            lean_codes: vec!["a".to_string()],
        };
        let response = run_visualize(config, request).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.kind, Some(ErrorKind::DependencyUnavailable));
        assert_eq!(response.exit_code(), 1);
    }

    fn bert_config() -> VizConfig {
        VizConfig {
            embedder: EmbedderBackend::Bert,
            ..VizConfig::default()
        }
    }

    #[tokio::test]
    async fn empty_statement_is_rejected_before_loading_the_embedder() {
        let request = VisualizeRequest {
            informal_statement: String::new(),
            lean_codes: vec!["a".to_string(); 5],
        };
        let response = run_visualize(bert_config(), request).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.kind, Some(ErrorKind::Validation));
        assert_eq!(response.status_code(), 400);
        assert_eq!(response.exit_code(), 2);
    }

    #[tokio::test]
    async fn no_codes_succeed_without_loading_the_embedder() {
        let request = VisualizeRequest {
            informal_statement: "s".to_string(),
            lean_codes: Vec::new(),
        };
        let response = run_visualize(bert_config(), request).await.unwrap();
        assert!(response.success);
        assert_eq!(response.plot_image.as_deref(), Some(""));
        assert_eq!(response.status_code(), 200);
    }
}
