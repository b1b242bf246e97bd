//! Ride operations for the repository.

use crate::domain::{
    BoundingBox, Driver, DriverId, DriverStatus, Ride, RideId, RideStatus, RiderId, TimeMs,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use super::{
    is_unique_violation, opt_time, parse_decimal, parse_ride_status, placeholders,
    point_from_columns, Repository,
};

const RIDE_COLUMNS: &str = r#"
    id, rider_id, driver_id, pickup_lat, pickup_lng, destination_lat, destination_lng,
    status, fare_amount, estimated_duration_minutes, created_at_ms, accepted_at_ms,
    started_at_ms, completed_at_ms, cancelled_at_ms, updated_at_ms
"#;

fn ride_from_row(row: &SqliteRow) -> Result<Ride, sqlx::Error> {
    let id_str = row.get::<String, _>("id");
    let id = RideId::parse(&id_str)
        .ok_or_else(|| super::decode_error(format!("invalid ride id {}", id_str)))?;
    let pickup = point_from_columns(
        Some(row.get::<f64, _>("pickup_lat")),
        Some(row.get::<f64, _>("pickup_lng")),
    )?
    .ok_or_else(|| super::decode_error(format!("ride {} has no pickup", id_str)))?;

    Ok(Ride {
        id,
        rider_id: RiderId::new(row.get::<String, _>("rider_id")),
        driver_id: row.get::<Option<String>, _>("driver_id").map(DriverId::new),
        pickup,
        destination: point_from_columns(
            row.get::<Option<f64>, _>("destination_lat"),
            row.get::<Option<f64>, _>("destination_lng"),
        )?,
        status: parse_ride_status(&row.get::<String, _>("status"))?,
        fare_amount: row
            .get::<Option<String>, _>("fare_amount")
            .map(|s| parse_decimal(&s))
            .transpose()?,
        estimated_duration_minutes: row.get::<Option<i64>, _>("estimated_duration_minutes"),
        created_at: TimeMs::new(row.get::<i64, _>("created_at_ms")),
        accepted_at: opt_time(row.get::<Option<i64>, _>("accepted_at_ms")),
        started_at: opt_time(row.get::<Option<i64>, _>("started_at_ms")),
        completed_at: opt_time(row.get::<Option<i64>, _>("completed_at_ms")),
        cancelled_at: opt_time(row.get::<Option<i64>, _>("cancelled_at_ms")),
        updated_at: TimeMs::new(row.get::<i64, _>("updated_at_ms")),
    })
}

impl Repository {
    /// Insert a new ride only if its rider has no ride in an active status.
    ///
    /// The existence check and the insert are one statement; the partial unique
    /// index on active rides catches the remaining concurrent window. Returns
    /// `false` when the rider already has an active ride.
    ///
    /// # Errors
    /// Returns an error if the insert fails for any other reason.
    pub async fn insert_ride_if_rider_idle(&self, ride: &Ride) -> Result<bool, sqlx::Error> {
        let active = placeholders(RideStatus::ACTIVE.len());
        let sql = format!(
            r#"
            INSERT INTO rides (
                id, rider_id, driver_id, pickup_lat, pickup_lng, destination_lat, destination_lng,
                status, fare_amount, estimated_duration_minutes, created_at_ms, accepted_at_ms,
                started_at_ms, completed_at_ms, cancelled_at_ms, updated_at_ms
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM rides WHERE rider_id = ? AND status IN ({})
            )
            "#,
            active
        );

        let mut query = sqlx::query(&sql)
            .bind(ride.id.to_string())
            .bind(ride.rider_id.as_str())
            .bind(ride.driver_id.as_ref().map(|d| d.as_str().to_string()))
            .bind(ride.pickup.lat)
            .bind(ride.pickup.lng)
            .bind(ride.destination.map(|p| p.lat))
            .bind(ride.destination.map(|p| p.lng))
            .bind(ride.status.as_str())
            .bind(ride.fare_amount.map(|d| d.to_canonical_string()))
            .bind(ride.estimated_duration_minutes)
            .bind(ride.created_at.as_ms())
            .bind(ride.accepted_at.map(|t| t.as_ms()))
            .bind(ride.started_at.map(|t| t.as_ms()))
            .bind(ride.completed_at.map(|t| t.as_ms()))
            .bind(ride.cancelled_at.map(|t| t.as_ms()))
            .bind(ride.updated_at.as_ms())
            .bind(ride.rider_id.as_str());
        for status in RideStatus::ACTIVE {
            query = query.bind(status.as_str());
        }

        match query.execute(&self.pool).await {
            Ok(result) => Ok(result.rows_affected() > 0),
            Err(e) if is_unique_violation(&e) => {
                debug!(rider_id = %ride.rider_id, "Concurrent ride insert rejected by index");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch a ride by id.
    ///
    /// # Errors
    /// Returns an error if the query fails or the stored row is malformed.
    pub async fn get_ride(&self, ride_id: &RideId) -> Result<Option<Ride>, sqlx::Error> {
        let sql = format!("SELECT {} FROM rides WHERE id = ?", RIDE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(ride_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(ride_from_row).transpose()
    }

    /// Write a transitioned ride only if the stored status still equals `expected`.
    ///
    /// Returns `false` when another writer moved the ride first.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn update_ride_if_status(
        &self,
        ride: &Ride,
        expected: RideStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE rides SET
                driver_id = ?,
                status = ?,
                fare_amount = ?,
                estimated_duration_minutes = ?,
                accepted_at_ms = ?,
                started_at_ms = ?,
                completed_at_ms = ?,
                cancelled_at_ms = ?,
                updated_at_ms = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(ride.driver_id.as_ref().map(|d| d.as_str().to_string()))
        .bind(ride.status.as_str())
        .bind(ride.fare_amount.map(|d| d.to_canonical_string()))
        .bind(ride.estimated_duration_minutes)
        .bind(ride.accepted_at.map(|t| t.as_ms()))
        .bind(ride.started_at.map(|t| t.as_ms()))
        .bind(ride.completed_at.map(|t| t.as_ms()))
        .bind(ride.cancelled_at.map(|t| t.as_ms()))
        .bind(ride.updated_at.as_ms())
        .bind(ride.id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist an accepted ride and its now-busy driver as one unit.
    ///
    /// `ride` and `driver` carry the post-transition state. The driver row is
    /// claimed first (`AVAILABLE` → new status), then the ride (`REQUESTED` →
    /// new status); if either condition no longer holds nothing is written and
    /// `false` is returned. Exactly one of several concurrent callers targeting
    /// the same driver can observe `true`.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn assign_ride_to_driver(
        &self,
        ride: &Ride,
        driver: &Driver,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE drivers SET status = ?, updated_at_ms = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(driver.status.as_str())
        .bind(driver.updated_at.as_ms())
        .bind(driver.id.as_str())
        .bind(DriverStatus::Available.as_str())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let accepted = sqlx::query(
            r#"
            UPDATE rides SET driver_id = ?, status = ?, accepted_at_ms = ?, updated_at_ms = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(driver.id.as_str())
        .bind(ride.status.as_str())
        .bind(ride.accepted_at.map(|t| t.as_ms()))
        .bind(ride.updated_at.as_ms())
        .bind(ride.id.to_string())
        .bind(RideStatus::Requested.as_str())
        .execute(&mut *tx)
        .await;

        match accepted {
            Ok(result) if result.rows_affected() > 0 => {
                tx.commit().await?;
                Ok(true)
            }
            Ok(_) => {
                tx.rollback().await?;
                Ok(false)
            }
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// The rider's ride in `REQUESTED`, `ACCEPTED` or `IN_PROGRESS`, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    #[cfg(test)]
    pub async fn find_active_ride_for_rider(
        &self,
        rider_id: &RiderId,
    ) -> Result<Option<Ride>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM rides WHERE rider_id = ? AND status IN ({}) LIMIT 1",
            RIDE_COLUMNS,
            placeholders(RideStatus::ACTIVE.len())
        );
        let mut query = sqlx::query(&sql).bind(rider_id.as_str());
        for status in RideStatus::ACTIVE {
            query = query.bind(status.as_str());
        }
        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(ride_from_row).transpose()
    }

    /// The ride currently assigned to a driver (`ACCEPTED` or `IN_PROGRESS`).
    ///
    /// # Errors
    /// Returns an error if the query fails.
    #[cfg(test)]
    pub async fn find_active_ride_for_driver(
        &self,
        driver_id: &DriverId,
    ) -> Result<Option<Ride>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM rides WHERE driver_id = ? AND status IN (?, ?) LIMIT 1",
            RIDE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(driver_id.as_str())
            .bind(RideStatus::Accepted.as_str())
            .bind(RideStatus::InProgress.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(ride_from_row).transpose()
    }

    /// A rider's rides, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn rides_by_rider(
        &self,
        rider_id: &RiderId,
        limit: i64,
    ) -> Result<Vec<Ride>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM rides WHERE rider_id = ? ORDER BY created_at_ms DESC, id LIMIT ?",
            RIDE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(rider_id.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(ride_from_row).collect()
    }

    /// A driver's rides, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn rides_by_driver(
        &self,
        driver_id: &DriverId,
        limit: i64,
    ) -> Result<Vec<Ride>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM rides WHERE driver_id = ? ORDER BY created_at_ms DESC, id LIMIT ?",
            RIDE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(driver_id.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(ride_from_row).collect()
    }

    /// Rides in a given status, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    #[cfg(test)]
    pub async fn rides_by_status(
        &self,
        status: RideStatus,
        limit: i64,
    ) -> Result<Vec<Ride>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM rides WHERE status = ? ORDER BY created_at_ms ASC, id LIMIT ?",
            RIDE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(ride_from_row).collect()
    }

    /// Number of `REQUESTED` rides whose pickup lies inside `area`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_pending_rides_in_area(&self, area: &BoundingBox) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM rides
            WHERE status = ?
              AND pickup_lat BETWEEN ? AND ?
              AND pickup_lng BETWEEN ? AND ?
            "#,
        )
        .bind(RideStatus::Requested.as_str())
        .bind(area.min_lat)
        .bind(area.max_lat)
        .bind(area.min_lng)
        .bind(area.max_lng)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{Decimal, GeoPoint};
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    fn ride_for(rider: &str, now: i64) -> Ride {
        Ride::request(
            RiderId::new(rider),
            GeoPoint::new(40.7590, -73.9850).unwrap(),
            Some(GeoPoint::new(40.7128, -74.0060).unwrap()),
            TimeMs::new(now),
        )
    }

    async fn available_driver(repo: &Repository, id: &str) -> Driver {
        let mut driver = Driver::register(DriverId::new(id), "Dana".to_string(), TimeMs::new(0));
        driver.update_location(GeoPoint::new(40.7589, -73.9851).unwrap(), TimeMs::new(1));
        driver.go_online(TimeMs::new(2)).unwrap();
        assert!(repo.insert_driver(&driver).await.unwrap());
        driver
    }

    #[tokio::test]
    async fn test_insert_and_get_ride() {
        let (repo, _temp) = setup_test_db().await;
        let ride = ride_for("rider-1", 1_000);

        assert!(repo.insert_ride_if_rider_idle(&ride).await.unwrap());
        let loaded = repo.get_ride(&ride.id).await.unwrap().unwrap();
        assert_eq!(loaded, ride);
        assert!(repo.get_ride(&RideId::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_active_ride_for_rider_rejected() {
        let (repo, _temp) = setup_test_db().await;
        let first = ride_for("rider-1", 1_000);
        let second = ride_for("rider-1", 2_000);

        assert!(repo.insert_ride_if_rider_idle(&first).await.unwrap());
        assert!(!repo.insert_ride_if_rider_idle(&second).await.unwrap());

        let mut cancelled = first.clone();
        cancelled.cancel(TimeMs::new(3_000)).unwrap();
        assert!(repo
            .update_ride_if_status(&cancelled, RideStatus::Requested)
            .await
            .unwrap());

        assert!(repo.insert_ride_if_rider_idle(&second).await.unwrap());
        let active = repo
            .find_active_ride_for_rider(&RiderId::new("rider-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, second.id);
    }

    #[tokio::test]
    async fn test_update_ride_if_status_detects_stale_write() {
        let (repo, _temp) = setup_test_db().await;
        let ride = ride_for("rider-1", 1_000);
        repo.insert_ride_if_rider_idle(&ride).await.unwrap();

        let mut cancelled = ride.clone();
        cancelled.cancel(TimeMs::new(2_000)).unwrap();
        assert!(repo
            .update_ride_if_status(&cancelled, RideStatus::Requested)
            .await
            .unwrap());
        assert!(!repo
            .update_ride_if_status(&cancelled, RideStatus::Requested)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_assign_ride_to_driver_claims_once() {
        let (repo, _temp) = setup_test_db().await;
        let driver = available_driver(&repo, "D").await;

        let first = ride_for("rider-1", 1_000);
        let second = ride_for("rider-2", 1_000);
        repo.insert_ride_if_rider_idle(&first).await.unwrap();
        repo.insert_ride_if_rider_idle(&second).await.unwrap();

        let mut busy = driver.clone();
        busy.start_ride(TimeMs::new(5)).unwrap();

        let mut accepted = first.clone();
        accepted.accept(driver.id.clone(), TimeMs::new(5)).unwrap();
        assert!(repo.assign_ride_to_driver(&accepted, &busy).await.unwrap());

        let mut other = second.clone();
        other.accept(driver.id.clone(), TimeMs::new(6)).unwrap();
        assert!(!repo.assign_ride_to_driver(&other, &busy).await.unwrap());

        let stored = repo.get_ride(&second.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RideStatus::Requested);
        assert_eq!(stored.driver_id, None);

        let stored_driver = repo.get_driver(&driver.id).await.unwrap().unwrap();
        assert_eq!(stored_driver.status, DriverStatus::Busy);

        let active = repo
            .find_active_ride_for_driver(&driver.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, first.id);
    }

    #[tokio::test]
    async fn test_assign_rolls_back_driver_when_ride_moved() {
        let (repo, _temp) = setup_test_db().await;
        let driver = available_driver(&repo, "D").await;
        let ride = ride_for("rider-1", 1_000);
        repo.insert_ride_if_rider_idle(&ride).await.unwrap();

        let mut cancelled = ride.clone();
        cancelled.cancel(TimeMs::new(2)).unwrap();
        repo.update_ride_if_status(&cancelled, RideStatus::Requested)
            .await
            .unwrap();

        let mut busy = driver.clone();
        busy.start_ride(TimeMs::new(5)).unwrap();
        let mut accepted = ride.clone();
        accepted.accept(driver.id.clone(), TimeMs::new(5)).unwrap();
        assert!(!repo.assign_ride_to_driver(&accepted, &busy).await.unwrap());

        let stored_driver = repo.get_driver(&driver.id).await.unwrap().unwrap();
        assert_eq!(stored_driver.status, DriverStatus::Available);
    }

    #[tokio::test]
    async fn test_fare_roundtrips_as_decimal() {
        let (repo, _temp) = setup_test_db().await;
        let driver = available_driver(&repo, "D").await;
        let ride = ride_for("rider-1", 1_000);
        repo.insert_ride_if_rider_idle(&ride).await.unwrap();

        let mut busy = driver.clone();
        busy.start_ride(TimeMs::new(5)).unwrap();
        let mut r = ride.clone();
        r.accept(driver.id.clone(), TimeMs::new(5)).unwrap();
        repo.assign_ride_to_driver(&r, &busy).await.unwrap();

        r.start(TimeMs::new(6)).unwrap();
        repo.update_ride_if_status(&r, RideStatus::Accepted)
            .await
            .unwrap();
        r.complete(Decimal::from_parts(1850, 2), TimeMs::new(7))
            .unwrap();
        repo.update_ride_if_status(&r, RideStatus::InProgress)
            .await
            .unwrap();

        let stored = repo.get_ride(&ride.id).await.unwrap().unwrap();
        assert_eq!(stored.fare_amount, Some(Decimal::from_parts(1850, 2)));
        assert_eq!(stored.status, RideStatus::Completed);
        assert_eq!(
            repo.rides_by_driver(&driver.id, 10).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_count_pending_rides_in_area() {
        let (repo, _temp) = setup_test_db().await;
        repo.insert_ride_if_rider_idle(&ride_for("a", 1)).await.unwrap();
        repo.insert_ride_if_rider_idle(&ride_for("b", 2)).await.unwrap();

        let near = BoundingBox::around(GeoPoint::new(40.7590, -73.9850).unwrap(), 2.0);
        let far = BoundingBox::around(GeoPoint::new(51.5074, -0.1278).unwrap(), 2.0);
        assert_eq!(repo.count_pending_rides_in_area(&near).await.unwrap(), 2);
        assert_eq!(repo.count_pending_rides_in_area(&far).await.unwrap(), 0);

        let pending = repo.rides_by_status(RideStatus::Requested, 10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].rider_id, RiderId::new("a"));
    }
}
