//! List Command

use anyhow::Result;

use super::SourceArgs;
use crate::output::{print_list, DefinitionDisplay, OutputFormat};

pub fn execute(args: SourceArgs, format: OutputFormat) -> Result<()> {
    let definitions = args.load_definitions()?;
    let displays: Vec<DefinitionDisplay> = definitions.iter().map(DefinitionDisplay::from).collect();
    print_list(&displays, format)
}
