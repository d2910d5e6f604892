mod r#match;
mod reset;
pub mod server;
mod sync;

pub use r#match::*;
pub use reset::*;
pub use server::*;
pub use sync::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
