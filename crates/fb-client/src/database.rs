//! Database creation and removal.
//!
//! Both operations work without an open [`Connection`](crate::Connection):
//! they build a one-shot session for the single request.

use tracing::Instrument;

use crate::config::ConnectionOptions;
use crate::error::{Error, Result};
use crate::instrumentation::{self, span_names};
use crate::session::{Session, create_dpb};

pub use crate::config::DEFAULT_PAGE_SIZE;

/// Create the database named by `descriptor`.
///
/// A `page_size` of zero uses the descriptor's page size. With `overwrite`
/// an existing database at the same path is replaced.
pub async fn create_database(
    descriptor: &str,
    page_size: u32,
    forced_writes: bool,
    overwrite: bool,
) -> Result<()> {
    let options = ConnectionOptions::parse(descriptor)?;
    options.validate()?;
    let dpb = create_dpb(&options, page_size, forced_writes, overwrite)?;

    let span = instrumentation::lifecycle_span(span_names::CREATE_DATABASE, &options);
    async {
        let mut session = Session::create(&options, dpb).await?;
        let detached = session.detach().await;
        if let Err(e) = &detached {
            tracing::warn!(error = %e, "detach after create failed");
        }
        tracing::info!("database created");
        Ok::<_, Error>(())
    }
    .instrument(span)
    .await
}

/// Create a database with the default page size, forced writes on and no
/// overwrite.
pub async fn create_database_default(descriptor: &str) -> Result<()> {
    create_database(descriptor, DEFAULT_PAGE_SIZE, true, false).await
}

/// Drop the database named by `descriptor`.
pub async fn drop_database(descriptor: &str) -> Result<()> {
    let options = ConnectionOptions::parse(descriptor)?;
    options.validate()?;

    let span = instrumentation::lifecycle_span(span_names::DROP_DATABASE, &options);
    async {
        let mut session = Session::connect(&options).await?;
        session.drop_database().await?;
        tracing::info!("database dropped");
        Ok::<_, Error>(())
    }
    .instrument(span)
    .await
}
