use crate::db::{DatabaseGateway, ExecutionResult, GatewayError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Runs one statement through the gateway's read-only channel.
pub struct QueryExecutor {
    gateway: Arc<dyn DatabaseGateway>,
}

impl QueryExecutor {
    pub fn new(gateway: Arc<dyn DatabaseGateway>) -> Self {
        Self { gateway }
    }

    pub async fn execute(&self, sql: &str) -> Result<ExecutionResult, GatewayError> {
        let start_time = Instant::now();
        info!("Executing SQL: {}", sql);

        let result = self.gateway.exec_sql(sql).await?;

        match &result.error {
            Some(error) => warn!(
                "Database reported {} after {}ms: {}",
                error.code,
                start_time.elapsed().as_millis(),
                error.message
            ),
            None => info!(
                "Query executed successfully. Row count: {}, Execution time: {}ms",
                result.rows.len(),
                start_time.elapsed().as_millis()
            ),
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{clinic_gateway, FakeGateway};

    #[tokio::test]
    async fn database_error_is_returned_not_raised() {
        let executor = QueryExecutor::new(Arc::new(clinic_gateway()));
        let result = executor
            .execute("SELECT next_appointment FROM patients")
            .await
            .unwrap();

        let error = result.error.unwrap();
        assert_eq!(error.code, "42703");
        assert!(error.message.contains("next_appointment"));
    }

    #[tokio::test]
    async fn transport_failure_is_raised() {
        let executor = QueryExecutor::new(Arc::new(FakeGateway::unreachable()));
        assert!(executor.execute("SELECT 1").await.is_err());
    }
}
