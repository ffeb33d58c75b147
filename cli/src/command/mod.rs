mod generate;
mod install;
mod logs;
mod restart;
mod run;
mod start;
mod status;
mod stop;
mod uninstall;

pub use generate::Generate;
pub use install::Install;
pub use logs::Logs;
pub use restart::Restart;
pub use run::Run;
pub use start::Start;
pub use status::Status;
pub use stop::Stop;
pub use uninstall::Uninstall;
