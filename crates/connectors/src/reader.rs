use crate::{error::ConnectorError, query::OffsetQuery, row::RawRow};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Open read over one partition. Dropping the stream closes the read.
pub type RowStream = BoxStream<'static, Result<RawRow, ConnectorError>>;

#[async_trait]
pub trait PartitionReader: Send + Sync {
    /// Starts an offset-bounded read; rows come back ordered by the offset columns.
    async fn open(&self, query: &OffsetQuery) -> Result<RowStream, ConnectorError>;
}
