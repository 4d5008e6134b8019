//! Demo data for local development and dashboards.
//!
//! Everything is drawn from a seeded [`StdRng`], so the same seed always
//! produces the same rows and the same workflow figures.

use crate::{
    config::settings::{AlertThresholds, AuthSettings},
    core::{
        alert,
        auth::{self, NewUser},
        device::{self, DeviceType, NewDevice},
        project::{self, NewProject, ProjectPriority, ProjectType},
        telemetry,
    },
    errors::Result,
};
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};

/// Password of every generated account.
pub const DEMO_PASSWORD: &str = "Demo!Pass123";

const DEMO_USERS: [(&str, &str); 3] = [
    ("demo_maker", "Ana Maker"),
    ("demo_operator", "Bruno Operator"),
    ("demo_designer", "Carla Designer"),
];

const PROJECT_NAMES: [&str; 6] = [
    "Filament spool holder",
    "Conveyor belt bracket",
    "QC camera mount",
    "Raspberry Pi enclosure",
    "Cable chain link",
    "Nozzle cleaning station",
];

const MATERIALS: [&str; 4] = ["PLA", "PETG", "ABS", "TPU"];

/// Samples recorded per metric.
const SERIES_LENGTH: usize = 24;

/// Rows written by [`seed_database`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub users: usize,
    pub projects: usize,
    pub devices: usize,
    pub telemetry: usize,
    pub alerts: usize,
}

fn metrics_for(device_type: DeviceType) -> &'static [(&'static str, &'static str)] {
    match device_type {
        DeviceType::Esp32Monitor => &[("temperature", "C"), ("humidity", "%"), ("percentage", "%")],
        DeviceType::ArduinoConveyor => &[("vibration", "g"), ("temperature", "C")],
        _ => &[("temperature", "C"), ("battery_level", "%")],
    }
}

/// One reading of `metric` at `step` of the series. Occasionally out of range
/// so the alert path gets exercised.
fn sample_value(rng: &mut StdRng, metric: &str, step: usize) -> f64 {
    let spike = rng.gen_bool(0.08);
    #[allow(clippy::cast_precision_loss)]
    let step = step as f64;
    let value = match metric {
        "temperature" if spike => rng.gen_range(72.0..90.0),
        "temperature" => rng.gen_range(21.0..32.0),
        "humidity" if spike => rng.gen_range(82.0..95.0),
        "humidity" => rng.gen_range(35.0..60.0),
        "vibration" if spike => rng.gen_range(5.5..8.0),
        "vibration" => rng.gen_range(0.2..2.5),
        // filament drains over the series
        "percentage" => (100.0 - step * 3.8 - rng.gen_range(0.0..2.0)).max(0.0),
        "battery_level" => (100.0 - step * 3.5).max(5.0),
        _ => rng.gen_range(0.0..100.0),
    };
    (value * 100.0).round() / 100.0
}

/// Writes demo users, projects, devices, telemetry series and the alerts
/// those series trigger.
///
/// Fails with a conflict when the demo accounts already exist.
#[instrument(skip(db, policy, thresholds))]
pub async fn seed_database(
    db: &DatabaseConnection,
    policy: &AuthSettings,
    thresholds: &AlertThresholds,
    seed: u64,
) -> Result<SeedSummary> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut summary = SeedSummary::default();

    let mut users = Vec::new();
    for (username, full_name) in DEMO_USERS {
        let user = auth::register_user(
            db,
            policy,
            NewUser {
                email: format!("{username}@3dpot.local"),
                username: username.to_string(),
                password: DEMO_PASSWORD.to_string(),
                full_name: Some(full_name.to_string()),
                phone: None,
                company: Some("3dPot Demo".to_string()),
            },
        )
        .await?;
        users.push(user);
    }
    summary.users = users.len();

    for (i, name) in PROJECT_NAMES.iter().enumerate() {
        let owner = &users[i % users.len()];
        let created = project::create_project(
            db,
            owner,
            NewProject {
                name: (*name).to_string(),
                description: Some(format!("Demo project: {name}")),
                project_type: ProjectType::ALL.choose(&mut rng).copied(),
                priority: ProjectPriority::ALL.choose(&mut rng).copied(),
                estimated_hours: Some(f64::from(rng.gen_range(2_u32..40))),
                material: MATERIALS.choose(&mut rng).map(ToString::to_string),
                filament_weight_start: Some(1000.0),
                tags: vec!["demo".to_string()],
                ..Default::default()
            },
        )
        .await?;
        project::update_progress(db, owner, created.id, rng.gen_range(0..=100)).await?;
        summary.projects += 1;
    }

    let operator = users.get(1).map(|u| u.id);
    let hardware = [
        (DeviceType::Esp32Monitor, "DEMO-ESP32-001", "Filament monitor", "Print farm"),
        (DeviceType::ArduinoConveyor, "DEMO-CONV-001", "Output conveyor", "Packing line"),
        (DeviceType::RaspberryQc, "DEMO-QC-001", "QC station", "Packing line"),
    ];
    for (device_type, serial, name, location) in hardware {
        let registered = device::register_device(
            db,
            operator,
            NewDevice {
                serial_number: serial.to_string(),
                name: name.to_string(),
                device_type,
                mac_address: None,
                location: Some(location.to_string()),
                firmware_version: Some("1.0.0".to_string()),
                ip_address: None,
                config: None,
            },
        )
        .await?;
        summary.devices += 1;

        for &(metric, unit) in metrics_for(device_type) {
            for step in 0..SERIES_LENGTH {
                let value = sample_value(&mut rng, metric, step);
                telemetry::record_telemetry(
                    db,
                    registered.id,
                    metric,
                    value,
                    Some(unit),
                    Some(json!({"source": "sample-data", "step": step})),
                )
                .await?;
                summary.telemetry += 1;

                if let Some(breach) = alert::evaluate_thresholds(thresholds, metric, value) {
                    let new_alert = breach.into_alert(
                        Some(registered.id),
                        Some(format!("{name} reported {metric} = {value}")),
                    );
                    let (_, inserted) = alert::raise_alert(db, new_alert).await?;
                    if inserted {
                        summary.alerts += 1;
                    }
                }
            }
        }
    }

    info!(?summary, "sample data written");
    Ok(summary)
}

/// Per-workflow generation profile.
struct WorkflowProfile {
    name: &'static str,
    file: &'static str,
    duration: (u32, u32),
    success_rate: f64,
}

const WORKFLOWS: [WorkflowProfile; 5] = [
    WorkflowProfile {
        name: "CI Pipeline",
        file: "ci.yml",
        duration: (120, 480),
        success_rate: 0.85,
    },
    WorkflowProfile {
        name: "Python Tests",
        file: "python-tests.yml",
        duration: (60, 180),
        success_rate: 0.95,
    },
    WorkflowProfile {
        name: "Code Quality",
        file: "code-quality.yml",
        duration: (45, 120),
        success_rate: 0.90,
    },
    WorkflowProfile {
        name: "Arduino Build",
        file: "arduino-build.yml",
        duration: (300, 900),
        success_rate: 0.75,
    },
    WorkflowProfile {
        name: "OpenSCAD 3D Models",
        file: "openscad.yml",
        duration: (30, 90),
        success_rate: 0.98,
    },
];

const RECENT_RUNS: usize = 10;
const HEALTHY_SUCCESS_RATE: f64 = 80.0;
const LOW_SUCCESS_RATE: f64 = 70.0;
const SLOW_DURATION_SECS: u32 = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub status: &'static str,
    pub conclusion: &'static str,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub duration_seconds: u32,
    pub head_branch: &'static str,
    pub head_sha: String,
    pub display_title: String,
    pub run_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSummary {
    pub id: u64,
    pub name: String,
    pub file: String,
    pub state: &'static str,
    pub total_runs: usize,
    pub success_runs: usize,
    pub failure_runs: usize,
    /// Percentage, one decimal
    pub success_rate: f64,
    pub average_duration_seconds: u32,
    pub recent_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub workflow: String,
    pub issue: String,
    pub recommendation: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowHealth {
    pub total_workflows: usize,
    pub healthy_workflows: usize,
    pub unhealthy_workflows: usize,
    pub average_success_rate: f64,
    pub total_runs_analyzed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedFigure {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Performance {
    pub fastest_workflow: NamedFigure,
    pub slowest_workflow: NamedFigure,
    pub most_reliable_workflow: NamedFigure,
    pub least_reliable_workflow: NamedFigure,
}

/// The document written by `sample-data --workflows-out`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowReport {
    pub timestamp: DateTime<Utc>,
    pub repository: &'static str,
    pub workflows: Vec<WorkflowSummary>,
    pub health: WorkflowHealth,
    pub performance: Option<Performance>,
    pub recommendations: Vec<Recommendation>,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn generate_run(rng: &mut StdRng, profile: &WorkflowProfile, started: DateTime<Utc>) -> WorkflowRun {
    let conclusion = if rng.gen_bool(profile.success_rate) {
        "success"
    } else {
        ["failure", "cancelled", "timed_out"]
            .choose(rng)
            .copied()
            .unwrap_or("failure")
    };
    let duration = rng.gen_range(profile.duration.0..=profile.duration.1);
    let head_sha = (0..40)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect();
    let verb = ["Update", "Fix", "Add", "Refactor"].choose(rng).copied().unwrap_or("Update");
    WorkflowRun {
        id: rng.gen_range(100_000_000..1_000_000_000),
        status: "completed",
        conclusion,
        created_at: started,
        updated_at: started + Duration::seconds(i64::from(duration)),
        duration_seconds: duration,
        head_branch: ["main", "develop", "feature/new-monitor"]
            .choose(rng)
            .copied()
            .unwrap_or("main"),
        head_sha,
        display_title: format!("{} - {verb}", profile.name),
        run_number: rng.gen_range(30..=45),
    }
}

fn generate_workflow(rng: &mut StdRng, profile: &WorkflowProfile, now: DateTime<Utc>) -> WorkflowSummary {
    let recent_runs = (0..RECENT_RUNS)
        .map(|i| {
            let hours = i64::try_from(i * 2).unwrap_or(0);
            let started = now - Duration::hours(hours) - Duration::minutes(rng.gen_range(0..60));
            generate_run(rng, profile, started)
        })
        .collect::<Vec<_>>();

    let success_runs = recent_runs.iter().filter(|r| r.conclusion == "success").count();
    let failure_runs = recent_runs.len() - success_runs;
    let total_duration: u32 = recent_runs.iter().map(|r| r.duration_seconds).sum();
    let total = u32::try_from(recent_runs.len()).unwrap_or(u32::MAX).max(1);
    #[allow(clippy::cast_precision_loss)]
    let success_rate = round1(success_runs as f64 / f64::from(total) * 100.0);

    WorkflowSummary {
        id: rng.gen_range(1_000_000..10_000_000),
        name: profile.name.to_string(),
        file: format!(".github/workflows/{}", profile.file),
        state: "active",
        total_runs: recent_runs.len(),
        success_runs,
        failure_runs,
        success_rate,
        average_duration_seconds: total_duration / total,
        recent_runs,
    }
}

/// Reliability and speed advice for each workflow.
#[must_use]
pub fn recommendations(workflows: &[WorkflowSummary]) -> Vec<Recommendation> {
    let mut advice = Vec::new();
    for workflow in workflows {
        if workflow.success_rate < LOW_SUCCESS_RATE {
            advice.push(Recommendation {
                kind: "reliability",
                workflow: workflow.name.clone(),
                issue: format!("Low success rate ({}%)", workflow.success_rate),
                recommendation: "Investigate frequent failures and make the tests more robust",
            });
        }
        if workflow.average_duration_seconds > SLOW_DURATION_SECS {
            advice.push(Recommendation {
                kind: "performance",
                workflow: workflow.name.clone(),
                issue: format!(
                    "High average duration ({}s)",
                    workflow.average_duration_seconds
                ),
                recommendation: "Cache dependencies and parallelize jobs",
            });
        }
        if workflow.failure_runs > workflow.success_runs {
            advice.push(Recommendation {
                kind: "reliability",
                workflow: workflow.name.clone(),
                issue: format!(
                    "More failures than successes ({} vs {})",
                    workflow.failure_runs, workflow.success_runs
                ),
                recommendation: "Prioritize fixing the tests and validating code",
            });
        }
    }
    advice
}

fn duration_figure(workflow: &WorkflowSummary) -> NamedFigure {
    NamedFigure {
        name: workflow.name.clone(),
        value: f64::from(workflow.average_duration_seconds),
    }
}

fn rate_figure(workflow: &WorkflowSummary) -> NamedFigure {
    NamedFigure {
        name: workflow.name.clone(),
        value: workflow.success_rate,
    }
}

fn performance(workflows: &[WorkflowSummary]) -> Option<Performance> {
    let with_runs = || workflows.iter().filter(|w| w.total_runs > 0);
    let fastest = with_runs().min_by_key(|w| w.average_duration_seconds)?;
    let slowest = with_runs().max_by_key(|w| w.average_duration_seconds)?;
    let most_reliable = with_runs().max_by(|a, b| a.success_rate.total_cmp(&b.success_rate))?;
    let least_reliable = with_runs().min_by(|a, b| a.success_rate.total_cmp(&b.success_rate))?;
    Some(Performance {
        fastest_workflow: duration_figure(fastest),
        slowest_workflow: duration_figure(slowest),
        most_reliable_workflow: rate_figure(most_reliable),
        least_reliable_workflow: rate_figure(least_reliable),
    })
}

/// Builds the CI workflow monitoring document for the dashboard.
#[must_use]
pub fn generate_workflow_report(seed: u64, now: DateTime<Utc>) -> WorkflowReport {
    let mut rng = StdRng::seed_from_u64(seed);
    let workflows = WORKFLOWS
        .iter()
        .map(|profile| generate_workflow(&mut rng, profile, now))
        .collect::<Vec<_>>();

    let healthy_workflows = workflows
        .iter()
        .filter(|w| w.success_rate >= HEALTHY_SUCCESS_RATE)
        .count();
    #[allow(clippy::cast_precision_loss)]
    let average_success_rate = if workflows.is_empty() {
        0.0
    } else {
        round1(workflows.iter().map(|w| w.success_rate).sum::<f64>() / workflows.len() as f64)
    };

    WorkflowReport {
        timestamp: now,
        repository: "3dpot/3dpot",
        health: WorkflowHealth {
            total_workflows: workflows.len(),
            healthy_workflows,
            unhealthy_workflows: workflows.len() - healthy_workflows,
            average_success_rate,
            total_runs_analyzed: workflows.iter().map(|w| w.total_runs).sum(),
        },
        performance: performance(&workflows),
        recommendations: recommendations(&workflows),
        workflows,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::alert::AlertFilter;
    use crate::errors::Error;
    use crate::test_utils::setup_test_db;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_seed_database() -> Result<()> {
        let db = setup_test_db().await?;
        let summary =
            seed_database(&db, &AuthSettings::default(), &AlertThresholds::default(), 7).await?;

        assert_eq!(summary.users, 3);
        assert_eq!(summary.projects, PROJECT_NAMES.len());
        assert_eq!(summary.devices, 3);
        assert_eq!(summary.telemetry, (3 + 2 + 2) * SERIES_LENGTH);

        let alerts = alert::list_alerts(&db, &AlertFilter::default()).await?;
        assert_eq!(alerts.len(), summary.alerts);
        // the filament series always drains below the low-filament threshold
        assert!(summary.alerts >= 1);

        let again =
            seed_database(&db, &AuthSettings::default(), &AlertThresholds::default(), 7).await;
        assert!(matches!(again, Err(Error::Conflict { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_seed_is_reproducible() -> Result<()> {
        let first = setup_test_db().await?;
        let second = setup_test_db().await?;
        let a = seed_database(&first, &AuthSettings::default(), &AlertThresholds::default(), 42).await?;
        let b = seed_database(&second, &AuthSettings::default(), &AlertThresholds::default(), 42).await?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_workflow_report() {
        let report = generate_workflow_report(1, fixed_now());
        assert_eq!(report.workflows.len(), 5);
        assert_eq!(report.health.total_runs_analyzed, 50);
        for workflow in &report.workflows {
            assert_eq!(workflow.recent_runs.len(), RECENT_RUNS);
            assert_eq!(workflow.success_runs + workflow.failure_runs, RECENT_RUNS);
            let profile = WORKFLOWS.iter().find(|p| p.name == workflow.name).unwrap();
            assert!(workflow.average_duration_seconds >= profile.duration.0);
            assert!(workflow.average_duration_seconds <= profile.duration.1);
        }
        // duration ranges of these two never overlap the others' extremes
        let performance = report.performance.as_ref().unwrap();
        assert_ne!(performance.fastest_workflow.name, "Arduino Build");
        assert_ne!(performance.slowest_workflow.name, "OpenSCAD 3D Models");
        assert_eq!(report, generate_workflow_report(1, fixed_now()));
    }

    #[test]
    fn test_recommendations() {
        let mut slow = generate_workflow_report(3, fixed_now()).workflows.remove(0);
        slow.success_rate = 40.0;
        slow.success_runs = 4;
        slow.failure_runs = 6;
        slow.average_duration_seconds = 420;

        let kinds = recommendations(&[slow])
            .into_iter()
            .map(|r| r.kind)
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec!["reliability", "performance", "reliability"]);
    }
}
