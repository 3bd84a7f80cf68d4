mod account;
mod goals;
mod helpers;
mod log;
mod summary;
mod sync;

pub(crate) use account::{
    cmd_remote_clear, cmd_remote_set, cmd_signin, cmd_signout, cmd_whoami,
};
pub(crate) use goals::{cmd_goals_set, cmd_goals_show};
pub(crate) use log::{build_update, cmd_barcode, cmd_delete, cmd_edit, cmd_log};
pub(crate) use summary::cmd_summary;
pub(crate) use sync::{cmd_sync, cmd_watch};
