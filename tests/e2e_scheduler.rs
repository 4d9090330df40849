//! Scheduler tick scenarios, driven directly against `Scheduler` with a
//! controlled `now` rather than waiting on the background interval loops.

mod common;

use arportal::data::{ARContent, MarkerStatus, Notification, Video, VideoRotationSchedule};
use arportal::scheduler::Scheduler;
use chrono::{TimeZone, Utc};
use common::TestServer;

async fn seed_ar_content_with_videos(server: &TestServer, project_id: i64, company_id: i64) -> (ARContent, Vec<Video>) {
    let now = Utc::now();
    let mut content = ARContent {
        id: 0,
        project_id,
        company_id,
        unique_id: uuid::Uuid::new_v4().to_string(),
        title: "Rotating billboard".to_string(),
        image_path: "acme-ar/marker.png".to_string(),
        image_url: None,
        marker_path: None,
        marker_url: None,
        marker_status: MarkerStatus::Ready.as_str().to_string(),
        marker_feature_points: Some(42),
        is_active: true,
        active_video_id: None,
        created_at: now,
        updated_at: now,
    };
    content.id = server.state.db.insert_ar_content(&content).await.unwrap();

    let mut videos = Vec::new();
    for (i, title) in ["first", "second", "third"].iter().enumerate() {
        let mut video = Video {
            id: 0,
            ar_content_id: content.id,
            title: title.to_string(),
            video_path: format!("acme-ar/{title}.mp4"),
            video_url: None,
            duration_seconds: Some(10.0),
            width: Some(1920),
            height: Some(1080),
            mime_type: "video/mp4".to_string(),
            is_active: i == 0,
            rotation_order: i as i64,
            created_at: now,
            updated_at: now,
        };
        video.id = server.state.db.insert_video(&video).await.unwrap();
        videos.push(video);
    }
    server.state.db.set_active_video(content.id, videos[0].id, now).await.unwrap();

    (content, videos)
}

#[tokio::test]
async fn daily_rotation_tick_advances_to_the_next_video_and_reschedules_tomorrow() {
    let server = TestServer::new().await;
    let (company_id, project_id) = server.seed_company_and_project().await;
    let (content, videos) = seed_ar_content_with_videos(&server, project_id, company_id).await;

    let today_0900 = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
    let video_sequence = serde_json::to_string(&videos.iter().map(|v| v.id).collect::<Vec<_>>()).unwrap();
    let mut schedule = VideoRotationSchedule {
        id: 0,
        ar_content_id: content.id,
        rotation_type: "daily".to_string(),
        time_of_day: Some("09:00".to_string()),
        day_of_week: None,
        day_of_month: None,
        video_sequence_json: video_sequence,
        current_index: 0,
        last_rotation_at: None,
        next_rotation_at: today_0900,
        is_active: true,
        created_at: today_0900,
        updated_at: today_0900,
    };
    schedule.id = server.state.db.insert_rotation_schedule(&schedule).await.unwrap();

    let scheduler = Scheduler::new(server.state.db.clone(), server.state.content.clone(), server.state.config.scheduler.clone());
    scheduler.tick_rotation(today_0900 + chrono::Duration::seconds(10)).await.unwrap();

    let content_after = server.state.db.get_ar_content(content.id).await.unwrap().unwrap();
    assert_eq!(content_after.active_video_id, Some(videos[1].id));

    let schedule_after = server.state.db.get_rotation_schedule_by_ar_content(content.id).await.unwrap().unwrap();
    assert_eq!(schedule_after.current_index, 1);
    assert_eq!(schedule_after.next_rotation_at, today_0900 + chrono::Duration::days(1));
}

#[tokio::test]
async fn monthly_rotation_clamps_next_fire_to_the_last_day_of_a_short_month() {
    let server = TestServer::new().await;
    let (company_id, project_id) = server.seed_company_and_project().await;
    let (content, videos) = seed_ar_content_with_videos(&server, project_id, company_id).await;

    let due_at = Utc.with_ymd_and_hms(2026, 2, 10, 9, 0, 0).unwrap();
    let video_sequence = serde_json::to_string(&videos.iter().map(|v| v.id).collect::<Vec<_>>()).unwrap();
    let schedule = VideoRotationSchedule {
        id: 0,
        ar_content_id: content.id,
        rotation_type: "monthly".to_string(),
        time_of_day: Some("09:00".to_string()),
        day_of_week: None,
        day_of_month: Some(31),
        video_sequence_json: video_sequence,
        current_index: 0,
        last_rotation_at: None,
        next_rotation_at: due_at,
        is_active: true,
        created_at: due_at,
        updated_at: due_at,
    };
    server.state.db.insert_rotation_schedule(&schedule).await.unwrap();

    let scheduler = Scheduler::new(server.state.db.clone(), server.state.content.clone(), server.state.config.scheduler.clone());
    scheduler.tick_rotation(due_at).await.unwrap();

    let schedule_after = server.state.db.get_rotation_schedule_by_ar_content(content.id).await.unwrap().unwrap();
    // February 2026 has 28 days; day_of_month=31 clamps to the last day.
    assert_eq!(schedule_after.next_rotation_at, Utc.with_ymd_and_hms(2026, 2, 28, 9, 0, 0).unwrap());
}

#[tokio::test]
async fn expiry_warning_tick_sends_at_most_one_notification_per_cooldown() {
    let server = TestServer::new().await;
    let (company_id, project_id) = server.seed_company_and_project().await;

    let now = Utc::now();
    // Re-point expires_at to land inside the warning horizon.
    sqlx::query("UPDATE projects SET expires_at = ?, last_notification_sent_at = NULL WHERE id = ?")
        .bind(now + chrono::Duration::days(3))
        .bind(project_id)
        .execute(server.state.db.pool())
        .await
        .unwrap();

    let scheduler = Scheduler::new(server.state.db.clone(), server.state.content.clone(), server.state.config.scheduler.clone());
    scheduler.tick_expiry_warning(now).await.unwrap();
    scheduler.tick_expiry_warning(now + chrono::Duration::hours(1)).await.unwrap();

    let notifications: Vec<Notification> =
        server.state.db.list_notifications(Some(company_id), Some("expiry_warning"), 10, 0).await.unwrap();
    assert_eq!(notifications.len(), 1);
}
