mod goals;
mod helpers;
mod intake;
mod log;
mod summary;

pub(crate) use goals::{cmd_goals_progress, cmd_goals_reset, cmd_goals_set, cmd_goals_show};
pub(crate) use intake::{EntryChanges, cmd_clear, cmd_delete, cmd_search, cmd_top, cmd_update};
pub(crate) use log::{MacroArgs, cmd_barcode, cmd_log};
pub(crate) use summary::{cmd_month, cmd_summary, cmd_week};
