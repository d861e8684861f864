use tracing::{debug, info, warn};

use crate::model::DataPoint;

use super::client::{format_hours, HourFormatter, RemoteApi, RemoteError};

/// What one reconciliation pass did to a goal.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Reconciles locally computed data points against the service's view of a
/// goal, one goal per call. Keeps nothing between passes: a failed cycle is
/// simply rerun from scratch later.
pub struct SyncEngine<C> {
    client: C,
    hour_format: HourFormatter,
}

impl<C: RemoteApi> SyncEngine<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            hour_format: format_hours,
        }
    }

    /// Walks local and remote points in ascending timestamp order, issuing
    /// one call at a time: create where the service has nothing, update
    /// where value or comment drifted, delete where the local side retracted
    /// an entry. The first failed call aborts the rest of the cycle so an
    /// unreachable service isn't hammered with the remaining mutations.
    pub async fn sync_goal(
        &self,
        goal: &str,
        local: &[DataPoint],
    ) -> Result<SyncReport, RemoteError> {
        let reset = self.client.fetch_reset_date(goal).await?;
        // A failed fetch means the remote view is unknown, not empty.
        let remote = self.client.fetch_all_data_points(goal).await?;

        let mut eligible: Vec<&DataPoint> =
            local.iter().filter(|v| v.timestamp >= reset).collect();
        eligible.sort_by_key(|v| v.timestamp);
        // Points before the reset belong to a closed accounting window and
        // are left untouched on both sides.
        let remote: Vec<&DataPoint> = remote.iter().filter(|v| v.timestamp >= reset).collect();

        let mut report = SyncReport::default();
        let mut local_index = 0;
        let mut remote_index = 0;

        while local_index < eligible.len() || remote_index < remote.len() {
            match (eligible.get(local_index), remote.get(remote_index)) {
                (Some(local_point), Some(remote_point))
                    if local_point.timestamp == remote_point.timestamp =>
                {
                    if self.differs(local_point, remote_point) {
                        match remote_point.id.as_deref() {
                            Some(id) => {
                                debug!("Updating data point {id} at {}", local_point.timestamp);
                                self.client.update_data_point(goal, id, local_point).await?;
                                report.updated += 1;
                            }
                            None => warn!(
                                "Remote point at {} has no id, can't update it",
                                remote_point.timestamp
                            ),
                        }
                    }
                    local_index += 1;
                    remote_index += 1;
                }
                (Some(local_point), remote_point)
                    if remote_point.map_or(true, |v| local_point.timestamp < v.timestamp) =>
                {
                    debug!("Creating data point at {}", local_point.timestamp);
                    self.client.create_data_point(goal, local_point).await?;
                    report.created += 1;
                    local_index += 1;
                }
                (_, Some(remote_point)) => {
                    match remote_point.id.as_deref() {
                        Some(id) => {
                            debug!("Deleting data point {id} at {}", remote_point.timestamp);
                            self.client.delete_data_point(goal, id).await?;
                            report.deleted += 1;
                        }
                        None => warn!(
                            "Remote point at {} has no id, can't delete it",
                            remote_point.timestamp
                        ),
                    }
                    remote_index += 1;
                }
                // The loop condition guarantees at least one side has points
                // left, and a lone local point always satisfies the create
                // guard above.
                _ => unreachable!(),
            }
        }

        info!(
            "Goal {goal}: {} created, {} updated, {} deleted",
            report.created, report.updated, report.deleted
        );
        Ok(report)
    }

    fn differs(&self, local_point: &DataPoint, remote_point: &DataPoint) -> bool {
        // Values are compared the way they go over the wire. Raw float
        // equality would flag every point that round-tripped through the
        // service's JSON.
        (self.hour_format)(local_point.hours) != (self.hour_format)(remote_point.hours)
            || local_point.comment != remote_point.comment
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::remote::client::MockRemoteApi;

    use super::*;

    fn local(timestamp: i64, hours: f64) -> DataPoint {
        DataPoint::new(timestamp, hours, "")
    }

    fn remote(id: &str, timestamp: i64, hours: f64) -> DataPoint {
        DataPoint {
            id: Some(id.into()),
            timestamp,
            hours,
            comment: String::new(),
        }
    }

    fn parse_failure() -> RemoteError {
        RemoteError::Parse {
            reason: "expected value".into(),
            body: "<html>".into(),
        }
    }

    #[tokio::test]
    async fn test_creates_missing_and_deletes_retracted() -> Result<()> {
        let mut client = MockRemoteApi::new();
        client.expect_fetch_reset_date().returning(|_| Ok(0));
        client
            .expect_fetch_all_data_points()
            .returning(|_| Ok(vec![remote("a", 100, 1.0), remote("b", 300, 2.0)]));
        client
            .expect_create_data_point()
            .withf(|_, point| point.timestamp == 200)
            .times(1)
            .returning(|_, _| Ok(()));
        client
            .expect_delete_data_point()
            .withf(|_, id| id == "b")
            .times(1)
            .returning(|_, _| Ok(()));
        client.expect_update_data_point().never();

        let engine = SyncEngine::new(client);
        let report = engine
            .sync_goal("writing", &[local(100, 1.0), local(200, 1.5)])
            .await?;

        assert_eq!(
            report,
            SyncReport {
                created: 1,
                updated: 0,
                deleted: 1
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_updates_point_with_drifted_value() -> Result<()> {
        let mut client = MockRemoteApi::new();
        client.expect_fetch_reset_date().returning(|_| Ok(0));
        client
            .expect_fetch_all_data_points()
            .returning(|_| Ok(vec![remote("a", 100, 1.0)]));
        client
            .expect_update_data_point()
            .withf(|_, id, point| id == "a" && point.hours == 1.5)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let engine = SyncEngine::new(client);
        let report = engine.sync_goal("writing", &[local(100, 1.5)]).await?;

        assert_eq!(report.updated, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_updates_point_with_changed_comment() -> Result<()> {
        let mut client = MockRemoteApi::new();
        client.expect_fetch_reset_date().returning(|_| Ok(0));
        client
            .expect_fetch_all_data_points()
            .returning(|_| Ok(vec![remote("a", 100, 1.0)]));
        client
            .expect_update_data_point()
            .withf(|_, _, point| point.comment == "2 pings")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let engine = SyncEngine::new(client);
        engine
            .sync_goal("writing", &[DataPoint::new(100, 1.0, "2 pings")])
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_matching_points_cause_no_calls() -> Result<()> {
        let mut client = MockRemoteApi::new();
        client.expect_fetch_reset_date().returning(|_| Ok(0));
        client
            .expect_fetch_all_data_points()
            .returning(|_| Ok(vec![remote("a", 100, 1.0)]));

        let engine = SyncEngine::new(client);
        let report = engine.sync_goal("writing", &[local(100, 1.0)]).await?;

        assert_eq!(report, SyncReport::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_fail_fast_stops_remaining_mutations() {
        let mut client = MockRemoteApi::new();
        client.expect_fetch_reset_date().returning(|_| Ok(0));
        client
            .expect_fetch_all_data_points()
            .returning(|_| Ok(vec![]));
        client
            .expect_create_data_point()
            .withf(|_, point| point.timestamp == 100)
            .times(1)
            .returning(|_, _| Ok(()));
        client
            .expect_create_data_point()
            .withf(|_, point| point.timestamp == 200)
            .times(1)
            .returning(|_, _| Err(parse_failure()));
        // No expectation for timestamp 300. Attempting it would panic the
        // mock, which is exactly the containment being asserted.

        let engine = SyncEngine::new(client);
        let result = engine
            .sync_goal(
                "writing",
                &[local(100, 1.0), local(200, 1.5), local(300, 2.0)],
            )
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_reset_date_excludes_old_entries_on_both_sides() -> Result<()> {
        let mut client = MockRemoteApi::new();
        client.expect_fetch_reset_date().returning(|_| Ok(150));
        client
            .expect_fetch_all_data_points()
            .returning(|_| Ok(vec![remote("a", 100, 1.0), remote("b", 200, 1.5)]));
        // The pre-reset local entry at 100 is not created, and the
        // pre-reset remote point "a" is not deleted.

        let engine = SyncEngine::new(client);
        let report = engine
            .sync_goal("writing", &[local(100, 1.0), local(200, 1.5)])
            .await?;

        assert_eq!(report, SyncReport::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_fetch_aborts_cycle_without_mutations() {
        let mut client = MockRemoteApi::new();
        client.expect_fetch_reset_date().returning(|_| Ok(0));
        client
            .expect_fetch_all_data_points()
            .returning(|_| Err(parse_failure()));

        let engine = SyncEngine::new(client);
        let result = engine.sync_goal("writing", &[local(100, 1.0)]).await;

        assert!(matches!(result, Err(RemoteError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_auth_failure_yields_no_partial_results() {
        let mut client = MockRemoteApi::new();
        client
            .expect_fetch_reset_date()
            .returning(|_| Err(RemoteError::Auth));

        let engine = SyncEngine::new(client);
        let result = engine.sync_goal("writing", &[local(100, 1.0)]).await;

        assert!(matches!(result, Err(RemoteError::Auth)));
    }
}
