use clap::{ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "code-opus", about = "Chat with a model that runs Python in a remote notebook sandbox", version)]
#[command(group(ArgGroup::new("md_switch").args(["md", "no_md"]).multiple(false)))]
pub struct Cli {
    /// Large language model to use.
    #[arg(long)]
    pub model: Option<String>,

    /// Maximum number of tokens the model may generate per turn.
    #[arg(long = "max-tokens")]
    pub max_tokens: Option<u32>,

    /// Directory artifacts returned by the sandbox are written to.
    #[arg(long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<String>,

    /// Render the model's text as Markdown.
    #[arg(long)]
    pub md: bool,
    /// Print the model's text as-is.
    #[arg(long = "no-md")]
    pub no_md: bool,

    /// Message to send before reading from stdin.
    /// Can be used multiple times: --message "load data" --message "plot it"
    #[arg(short = 'm', long = "message", action = clap::ArgAction::Append)]
    pub messages: Vec<String>,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
