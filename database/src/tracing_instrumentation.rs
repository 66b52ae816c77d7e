use diesel::connection::Instrumentation;
use diesel::connection::InstrumentationEvent;

/// Reports every connection, query and transaction event of a diesel connection as a tracing event
#[derive(Debug, Default)]
pub struct TracingInstrumentation;

impl Instrumentation for TracingInstrumentation {
    fn on_connection_event(&mut self, event: InstrumentationEvent<'_>) {
        match event {
            InstrumentationEvent::StartEstablishConnection { .. } => {
                tracing::trace!("establishing database connection");
            }
            InstrumentationEvent::FinishEstablishConnection { error, .. } => match error {
                Some(error) => tracing::warn!(%error, "failed to establish database connection"),
                None => tracing::trace!("database connection established"),
            },
            InstrumentationEvent::StartQuery { query, .. } => {
                tracing::trace!(%query, "executing query");
            }
            InstrumentationEvent::FinishQuery { query, error, .. } => match error {
                Some(error) => tracing::debug!(%query, %error, "query failed"),
                None => tracing::trace!(%query, "query finished"),
            },
            InstrumentationEvent::BeginTransaction { depth, .. } => {
                tracing::trace!(depth = depth.get(), "begin transaction");
            }
            InstrumentationEvent::CommitTransaction { depth, .. } => {
                tracing::trace!(depth = depth.get(), "commit transaction");
            }
            InstrumentationEvent::RollbackTransaction { depth, .. } => {
                tracing::debug!(depth = depth.get(), "rollback transaction");
            }
            _ => {}
        }
    }
}
