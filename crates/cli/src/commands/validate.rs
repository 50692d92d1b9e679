//! Validate Command

use anyhow::Result;

use super::SourceArgs;
use crate::output::{print_success, print_warning};

/// Load every definition and check it can be run with the current config.
/// Returns whether all of them can.
pub fn execute(args: SourceArgs) -> Result<bool> {
    let config = args.load_config()?;
    let definitions = args.load_definitions()?;

    let mut runnable = 0;
    for definition in &definitions {
        match definition.check_base_url(config.base_url.as_deref()) {
            Ok(()) => runnable += 1,
            Err(e) => print_warning(&format!("{}: {}", definition.name(), e)),
        }
    }

    if runnable == definitions.len() {
        print_success(&format!("{} definition(s) valid", runnable));
        Ok(true)
    } else {
        print_warning(&format!(
            "{} of {} definition(s) cannot run without --base-url",
            definitions.len() - runnable,
            definitions.len()
        ));
        Ok(false)
    }
}
