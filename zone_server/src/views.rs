//! Operator pages. Rendered server-side for the state at request time; the
//! embedded scripts poll `/get_status` to follow transitions.

use chrono::{DateTime, Utc};
use zone_monitor::{StatusReport, SurveillanceState};

const STYLE: &str = r#"
    <style>
        body { font-family: sans-serif; }
        .video-container { display: flex; justify-content: center; margin-top: 20px; }
        .double-video { flex-direction: row; }
        .video { margin: 10px; text-align: center; }
        #alert-button { display: block; margin: 20px auto; padding: 20px; font-size: 24px;
            background-color: red; color: white; border: none; border-radius: 10px; cursor: pointer; }
    </style>"#;

const INDEX_SCRIPT: &str = r#"
    <script>
        function addPoint(event) {
            const x = Math.round(event.offsetX);
            const y = Math.round(event.offsetY);
            fetch('/add_point', {
                method: 'POST',
                headers: { 'Content-Type': 'application/x-www-form-urlencoded' },
                body: 'x=' + x + '&y=' + y
            }).then(response => response.json()).then(data => {
                if (data.status !== 'arming') {
                    location.reload();
                }
            });
        }

        let shownStatus = null;
        function checkStatus() {
            fetch('/get_status')
                .then(response => response.json())
                .then(data => {
                    if (shownStatus === null) {
                        shownStatus = data.status;
                    } else if (data.status !== shownStatus) {
                        location.reload();
                    }
                });
        }

        setInterval(checkStatus, 1000);
    </script>"#;

const ELAPSED_SCRIPT: &str = r#"
    <script>
        function updateElapsedTime() {
            fetch('/get_status')
                .then(response => response.json())
                .then(data => {
                    if (data.status === 'alerted') {
                        const t = data.elapsed_time;
                        const pad = n => n.toString().padStart(2, '0');
                        document.getElementById('elapsed-time').innerText =
                            pad(Math.floor(t / 3600)) + ':' + pad(Math.floor((t % 3600) / 60)) + ':' + pad(t % 60);
                    }
                });
        }

        setInterval(updateElapsedTime, 1000);
    </script>"#;

/// `HH:MM:SS`; hours are not wrapped.
pub fn format_elapsed(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

pub fn format_onset(onset: Option<DateTime<Utc>>) -> String {
    onset
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

pub fn title(state: SurveillanceState) -> &'static str {
    match state {
        SurveillanceState::Arming => "Zone setup",
        SurveillanceState::Armed => "Monitoring",
        SurveillanceState::Alerted => "Vehicle escaped",
    }
}

fn page(title: &str, script: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n    <meta charset=\"utf-8\">\n    <title>{title}</title>{STYLE}{script}\n</head>\n<body>\n{body}\n</body>\n</html>\n"
    )
}

pub fn index_page(report: &StatusReport) -> String {
    let title = title(report.status);
    let content = match report.status {
        SurveillanceState::Arming => format!(
            r#"<div class="video">
            <h2>{title}</h2>
            <p>Click four points on the image to mark the zone ({} of 4 set).</p>
            <img src="/video_feed_1" width="640" height="480" onclick="addPoint(event)">
        </div>"#,
            report.points.len()
        ),
        SurveillanceState::Armed => format!(
            r#"<div class="video">
            <h2>{title}</h2>
            <img src="/video_feed_1" width="640" height="480">
        </div>"#
        ),
        SurveillanceState::Alerted => format!(
            r#"<div class="video">
            <h2>{title}</h2>
            <img src="/video_feed_1" width="640" height="480">
            <div><strong>Alert onset: {}</strong></div>
            <div><strong>Elapsed: {}</strong></div>
            <button id="alert-button" onclick="location.href='/trigger_alert'">Open both cameras</button>
        </div>"#,
            format_onset(report.onset),
            format_elapsed(report.elapsed_time)
        ),
    };

    page(
        title,
        INDEX_SCRIPT,
        &format!("<h1>{title}</h1>\n<div class=\"video-container\">\n        {content}\n</div>"),
    )
}

pub fn double_feed_page(report: &StatusReport) -> String {
    let body = format!(
        r#"<h1>{}</h1>
<div class="video-container double-video">
    <div class="video">
        <h2>Camera 1</h2>
        <img src="/video_feed_1" width="640" height="480">
    </div>
    <div class="video">
        <h2>Camera 2</h2>
        <img src="/video_feed_2" width="640" height="480">
    </div>
</div>
<div><strong>Alert onset: {}</strong></div>
<div><strong>Elapsed: <span id="elapsed-time">{}</span></strong></div>"#,
        title(SurveillanceState::Alerted),
        format_onset(report.onset),
        format_elapsed(report.elapsed_time)
    );

    page(title(SurveillanceState::Alerted), ELAPSED_SCRIPT, &body)
}
