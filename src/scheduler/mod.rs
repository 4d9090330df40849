//! Scheduler.
//!
//! Three independent ticks running as background tasks: a
//! `tokio::time::interval` loop that never returns an error to a caller,
//! only logs and keeps going. Each tick is idempotent so jitter or a
//! missed wakeup is harmless.

pub mod next_fire;

use chrono::{DateTime, Duration, Timelike, Utc};
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::content::ContentRepository;
use crate::data::{Database, Notification, NotificationKind};
use next_fire::next_fire;

pub struct Scheduler {
    db: Arc<Database>,
    content: Arc<ContentRepository>,
    cfg: SchedulerConfig,
}

impl Scheduler {
    pub fn new(db: Arc<Database>, content: Arc<ContentRepository>, cfg: SchedulerConfig) -> Self {
        Self { db, content, cfg }
    }

    /// Spawn all three ticks. Each runs until `shutdown` is signalled.
    pub fn spawn(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let expiry_warning = self.clone();
        let mut shutdown_a = shutdown.clone();
        tokio::spawn(async move {
            expiry_warning.run_expiry_warning_loop(&mut shutdown_a).await;
        });

        let deactivation = self.clone();
        let mut shutdown_b = shutdown.clone();
        tokio::spawn(async move {
            deactivation.run_deactivation_loop(&mut shutdown_b).await;
        });

        let rotation = self.clone();
        tokio::spawn(async move {
            rotation.run_rotation_loop(&mut shutdown).await;
        });
    }

    /// Daily expiry-warning tick. Checked every minute so a
    /// restart doesn't miss the configured hour by more than 60s; fires
    /// at most once per UTC day via an in-memory "already fired today"
    /// guard.
    async fn run_expiry_warning_loop(&self, shutdown: &mut tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        let mut last_fired_date = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now();
                    if now.hour() == self.cfg.expiry_warning_hour_utc && last_fired_date != Some(now.date_naive()) {
                        last_fired_date = Some(now.date_naive());
                        if let Err(e) = self.tick_expiry_warning(now).await {
                            tracing::warn!(error = %e, "expiry warning tick failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn run_deactivation_loop(&self, shutdown: &mut tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.cfg.deactivation_interval_seconds));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick_deactivation(Utc::now()).await {
                        tracing::warn!(error = %e, "deactivation tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn run_rotation_loop(&self, shutdown: &mut tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.cfg.rotation_interval_seconds));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick_rotation(Utc::now()).await {
                        tracing::warn!(error = %e, "rotation tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Notifies companies whose active projects are approaching expiry.
    pub async fn tick_expiry_warning(&self, now: DateTime<Utc>) -> crate::error::Result<()> {
        let horizon = now + Duration::days(7);
        let candidates = self.db.list_projects_expiring_within(now, horizon).await?;

        for project in candidates {
            let cooldown_elapsed = match project.last_notification_sent_at {
                None => true,
                Some(last) => (now - last) >= Duration::days(project.notify_before_expiry_days),
            };
            if !cooldown_elapsed {
                continue;
            }

            let notification = Notification {
                id: 0,
                company_id: project.company_id,
                project_id: Some(project.id),
                ar_content_id: None,
                kind: NotificationKind::ExpiryWarning.as_str().to_string(),
                subject: format!("Project '{}' expires soon", project.name),
                message: "This project will stop serving AR content when it expires.".to_string(),
                metadata_json: serde_json::json!({ "expires_at": project.expires_at }).to_string(),
                created_at: now,
            };
            self.db.insert_notification(&notification).await?;
            self.db.update_project_notification_sent(project.id, now).await?;
        }
        Ok(())
    }

    /// Expires active projects whose `expires_at` has passed.
    pub async fn tick_deactivation(&self, now: DateTime<Utc>) -> crate::error::Result<()> {
        let expired = self.db.list_expired_active_projects(now).await?;
        for project in expired {
            self.content.expire_project(&project).await?;
        }
        Ok(())
    }

    /// Advances any rotation schedule whose `next_rotation_at` is due.
    pub async fn tick_rotation(&self, now: DateTime<Utc>) -> crate::error::Result<()> {
        use rand::seq::SliceRandom;

        let due = self.db.list_due_rotation_schedules(now).await?;
        for schedule in due {
            crate::metrics::ROTATION_TICKS_TOTAL
                .with_label_values(&[&schedule.rotation_type])
                .inc();

            let live_videos = self.db.list_videos_by_ar_content(schedule.ar_content_id).await?;
            let live_ids: std::collections::HashSet<i64> = live_videos.iter().map(|v| v.id).collect();
            let sequence: Vec<i64> = schedule
                .video_sequence()
                .into_iter()
                .filter(|id| live_ids.contains(id))
                .collect();

            if sequence.is_empty() {
                self.park_stale_schedule(schedule.id, schedule.ar_content_id).await?;
                continue;
            }

            let rotation_type = schedule.rotation_type_enum();
            let current_index = (schedule.current_index as usize).min(sequence.len() - 1);
            let next_index = match rotation_type {
                Some(crate::data::RotationType::Random) => {
                    if sequence.len() == 1 {
                        current_index
                    } else {
                        let mut rng = rand::thread_rng();
                        let candidates: Vec<usize> = (0..sequence.len()).filter(|&i| i != current_index).collect();
                        *candidates.choose(&mut rng).unwrap_or(&current_index)
                    }
                }
                _ => (current_index + 1) % sequence.len(),
            };

            self.content
                .rotate_active_video(schedule.ar_content_id, sequence[next_index])
                .await?;

            let next_at = next_fire(
                rotation_type,
                schedule.time_of_day.as_deref(),
                schedule.day_of_week,
                schedule.day_of_month,
                now,
            );
            self.db
                .advance_rotation_schedule(schedule.id, next_index as i64, now, next_at, true, now)
                .await?;
        }
        Ok(())
    }

    async fn park_stale_schedule(&self, schedule_id: i64, ar_content_id: i64) -> crate::error::Result<()> {
        let now = Utc::now();
        self.db
            .advance_rotation_schedule(schedule_id, 0, now, now + Duration::days(365), false, now)
            .await?;

        if let Some(content) = self.db.get_ar_content(ar_content_id).await? {
            let notification = Notification {
                id: 0,
                company_id: content.company_id,
                project_id: Some(content.project_id),
                ar_content_id: Some(content.id),
                kind: NotificationKind::RotationStaleSchedule.as_str().to_string(),
                subject: format!("Rotation schedule for '{}' has no valid videos left", content.title),
                message: "Every video in this rotation sequence has been deleted; rotation is paused.".to_string(),
                metadata_json: serde_json::json!({}).to_string(),
                created_at: now,
            };
            self.db.insert_notification(&notification).await?;
        }
        Ok(())
    }
}
