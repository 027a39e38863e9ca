use std::cell::RefCell;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use attentrs::{
    AttentionDetector, AttentionReport, AuthContext, DetectorSettings, HttpReporter, PoseEstimate,
    ReportError, ReportPolicy, ReportSink,
};
use attentrs_vision::pose::{Keypoint, Part, PoseEstimator};
use attentrs_vision::video::VideoSource;
use image::RgbImage;
use nalgebra::Point2;
use tokio::task::LocalSet;
use tokio::time::Instant;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct StillCamera {
    width: u32,
    height: u32,
}

impl StillCamera {
    fn hd() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl VideoSource for StillCamera {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn frame(&mut self) -> Result<RgbImage> {
        Ok(RgbImage::new(self.width, self.height))
    }
}

/// Returns the same estimate every frame and records when it was asked.
#[derive(Clone)]
struct FixedEstimator {
    estimate: PoseEstimate,
    calls: Arc<Mutex<Vec<Instant>>>,
}

impl FixedEstimator {
    fn new(estimate: PoseEstimate) -> Self {
        Self {
            estimate,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

impl PoseEstimator for FixedEstimator {
    fn estimate(&mut self, _frame: &RgbImage) -> Result<PoseEstimate> {
        self.calls.lock().unwrap().push(Instant::now());
        Ok(self.estimate.clone())
    }
}

#[derive(Default)]
struct RecordingSink {
    fail: bool,
    reports: RefCell<Vec<AttentionReport>>,
}

impl ReportSink for RecordingSink {
    async fn report(&self, _auth: &AuthContext, report: &AttentionReport) -> Result<(), ReportError> {
        self.reports.borrow_mut().push(report.clone());
        if self.fail {
            Err(ReportError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE))
        } else {
            Ok(())
        }
    }
}

fn auth() -> AuthContext {
    AuthContext::new("tok", "cs101")
}

fn frontal() -> PoseEstimate {
    let kp = |part, x, y| Keypoint {
        part,
        position: Point2::new(x, y),
        score: 0.9,
    };
    PoseEstimate::from_keypoints(vec![
        kp(Part::Nose, 640.0, 360.0),
        kp(Part::LeftEye, 600.0, 340.0),
        kp(Part::RightEye, 680.0, 340.0),
    ])
}

fn nobody() -> PoseEstimate {
    PoseEstimate {
        score: 0.05,
        keypoints: Vec::new(),
    }
}

fn loader(estimator: &FixedEstimator) -> impl FnOnce() -> Result<FixedEstimator> + Send + 'static {
    let estimator = estimator.clone();
    move || Ok(estimator)
}

#[tokio::test(start_paused = true)]
async fn test_cadence_waits_between_frames() {
    LocalSet::new()
        .run_until(async {
            let estimator = FixedEstimator::new(frontal());
            let detector = AttentionDetector::new(DetectorSettings::default(), RecordingSink::default());
            detector
                .start(StillCamera::hd(), loader(&estimator), auth())
                .await
                .unwrap();
            assert!(detector.is_active());

            tokio::time::sleep(Duration::from_millis(4500)).await;
            detector.stop();
            detector.wait().await;

            let calls = estimator.calls();
            assert_eq!(calls.len(), 3);
            for pair in calls.windows(2) {
                assert!(pair[1] - pair[0] >= Duration::from_millis(2000));
            }
            assert_eq!(detector.sink().reports.borrow().len(), 3);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_nobody_present_reports_inattentive() {
    LocalSet::new()
        .run_until(async {
            let estimator = FixedEstimator::new(nobody());
            let detector = AttentionDetector::new(DetectorSettings::default(), RecordingSink::default());
            detector
                .start(StillCamera::hd(), loader(&estimator), auth())
                .await
                .unwrap();

            tokio::time::sleep(Duration::from_millis(100)).await;
            detector.stop();
            detector.wait().await;

            let reports = detector.sink().reports.borrow();
            assert_eq!(
                *reports,
                vec![AttentionReport {
                    class_id: "cs101".into(),
                    attention: false,
                }]
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_solved_only_policy_skips_unsolved_frames() {
    LocalSet::new()
        .run_until(async {
            let estimator = FixedEstimator::new(nobody());
            let settings = DetectorSettings {
                report_policy: ReportPolicy::SolvedOnly,
                ..DetectorSettings::default()
            };
            let detector = AttentionDetector::new(settings, RecordingSink::default());
            detector
                .start(StillCamera::hd(), loader(&estimator), auth())
                .await
                .unwrap();

            tokio::time::sleep(Duration::from_millis(2500)).await;
            detector.stop();
            detector.wait().await;

            assert_eq!(estimator.calls().len(), 2);
            assert!(detector.sink().reports.borrow().is_empty());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_reports_keep_the_loop_running() {
    LocalSet::new()
        .run_until(async {
            let estimator = FixedEstimator::new(frontal());
            let sink = RecordingSink {
                fail: true,
                ..RecordingSink::default()
            };
            let detector = AttentionDetector::new(DetectorSettings::default(), sink);
            detector
                .start(StillCamera::hd(), loader(&estimator), auth())
                .await
                .unwrap();

            tokio::time::sleep(Duration::from_millis(4500)).await;
            assert!(detector.is_active());
            detector.stop();
            detector.wait().await;

            assert_eq!(estimator.calls().len(), 3);
            assert_eq!(detector.sink().reports.borrow().len(), 3);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    LocalSet::new()
        .run_until(async {
            let estimator = FixedEstimator::new(frontal());
            let detector = AttentionDetector::new(DetectorSettings::default(), RecordingSink::default());
            detector.stop();

            detector
                .start(StillCamera::hd(), loader(&estimator), auth())
                .await
                .unwrap();
            detector.stop();
            detector.stop();
            detector.wait().await;
            detector.stop();

            assert!(!detector.is_active());
            tokio::time::sleep(Duration::from_secs(10)).await;
            assert!(estimator.calls().len() <= 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_loading_releases_the_model() {
    LocalSet::new()
        .run_until(async {
            let estimator = FixedEstimator::new(frontal());
            let detector = AttentionDetector::new(DetectorSettings::default(), RecordingSink::default());

            let (loading_tx, loading_rx) = tokio::sync::oneshot::channel::<()>();
            let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
            let loaded = estimator.clone();
            let slow_loader = move || -> Result<FixedEstimator> {
                let _ = loading_tx.send(());
                let _ = release_rx.recv();
                Ok(loaded)
            };

            let (started, ()) = tokio::join!(
                detector.start(StillCamera::hd(), slow_loader, auth()),
                async {
                    loading_rx.await.unwrap();
                    detector.stop();
                    release_tx.send(()).unwrap();
                }
            );

            assert!(started.is_ok());
            assert!(!detector.is_active());
            detector.wait().await;

            tokio::time::sleep(Duration::from_secs(10)).await;
            assert!(estimator.calls().is_empty());
            assert!(detector.sink().reports.borrow().is_empty());
            // Only the test's handle to the shared call log is left.
            assert_eq!(Arc::strong_count(&estimator.calls), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected() {
    LocalSet::new()
        .run_until(async {
            let estimator = FixedEstimator::new(frontal());
            let detector = AttentionDetector::new(DetectorSettings::default(), RecordingSink::default());
            detector
                .start(StillCamera::hd(), loader(&estimator), auth())
                .await
                .unwrap();

            let second = detector
                .start(StillCamera::hd(), loader(&estimator), auth())
                .await;
            assert!(second.is_err());
            assert!(detector.is_active());

            detector.stop();
            detector.wait().await;

            // A finished run can be followed by a fresh one.
            detector
                .start(StillCamera::hd(), loader(&estimator), auth())
                .await
                .unwrap();
            detector.stop();
            detector.wait().await;
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_initialization_is_returned() {
    LocalSet::new()
        .run_until(async {
            let detector = AttentionDetector::new(DetectorSettings::default(), RecordingSink::default());

            let failing = || -> Result<FixedEstimator> { anyhow::bail!("model file missing") };
            let err = detector
                .start(StillCamera::hd(), failing, auth())
                .await
                .unwrap_err();
            assert!(format!("{:#}", err).contains("model file missing"));
            assert!(!detector.is_active());

            let estimator = FixedEstimator::new(frontal());
            let empty = StillCamera {
                width: 0,
                height: 0,
            };
            assert!(detector.start(empty, loader(&estimator), auth()).await.is_err());
            assert!(estimator.calls().is_empty());

            detector.stop();
            detector.wait().await;
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_drop_stops_detection() {
    LocalSet::new()
        .run_until(async {
            let estimator = FixedEstimator::new(frontal());
            let detector = AttentionDetector::new(DetectorSettings::default(), RecordingSink::default());
            detector
                .start(StillCamera::hd(), loader(&estimator), auth())
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(detector);

            tokio::time::sleep(Duration::from_secs(10)).await;
            assert_eq!(estimator.calls().len(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_frontal_frame_posts_one_attentive_report() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/conference/attention"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    LocalSet::new()
        .run_until(async {
            let estimator = FixedEstimator::new(frontal());
            let reporter = HttpReporter::new(&server.uri(), Duration::from_secs(5)).unwrap();
            let detector = AttentionDetector::new(DetectorSettings::default(), reporter);
            detector
                .start(StillCamera::hd(), loader(&estimator), auth())
                .await
                .unwrap();

            let deadline = Instant::now() + Duration::from_secs(1);
            while server.received_requests().await.unwrap_or_default().is_empty()
                && Instant::now() < deadline
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            detector.stop();
            detector.wait().await;
        })
        .await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = requests[0].body_json().unwrap();
    assert_eq!(body, serde_json::json!({"classId": "cs101", "attention": true}));
    assert_eq!(
        requests[0].headers.get("authorization").unwrap(),
        "Bearer tok"
    );
}
