use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use smartaq_core::{
    DayOfWeek, RuntimeConfig, ScheduleEntry, ScheduleError, SensorConfig, TaskDescription,
    TaskHandle, TaskPool, TransitionMode, WeekTime,
};

use crate::{
    drivers::{
        Device, DeviceReading, Driver, LightSchedule, LoadCell, ScaleCalibration,
        ScheduledOutputs, SimulatedPwm, TemperatureProbe, Tick, Waveform, OUTPUT_CHANNELS,
    },
    store::{AppStore, ChannelState},
};

pub const TASK_POOL_CAPACITY: usize = 16;

/// Wall clock years before this mean the clock was never set.
const MIN_SYNCED_YEAR: i32 = 2024;

type SharedDevice = Arc<Mutex<Device>>;

#[derive(Clone)]
struct AppState {
    devices: Arc<Vec<SharedDevice>>,
    outputs: SharedDevice,
    pool: TaskPool<TASK_POOL_CAPACITY>,
    timezone: Tz,
    started: Instant,
    store: AppStore,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct DeviceView {
    name: &'static str,
    reading: DeviceReading,
}

#[derive(Debug, Serialize)]
struct TaskView {
    id: u64,
    description: String,
    #[serde(rename = "singleShot")]
    single_shot: bool,
    #[serde(rename = "intervalMs")]
    interval_ms: u64,
    #[serde(rename = "lastRunAgoMs")]
    last_run_ago_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ScheduleView {
    mode: TransitionMode,
    entries: Vec<ScheduleEntry<f32>>,
}

#[derive(Debug, Deserialize)]
struct ScheduleUpdate {
    entries: Vec<ScheduleEntry<f32>>,
    #[serde(default)]
    mode: Option<TransitionMode>,
}

#[derive(Debug, Deserialize)]
struct TimePointUpdate {
    day: DayOfWeek,
    #[serde(rename = "timeOfDay")]
    time_of_day: u32,
    channels: Vec<Option<f32>>,
}

#[derive(Debug, Deserialize)]
struct TimePointRef {
    day: DayOfWeek,
    #[serde(rename = "timeOfDay")]
    time_of_day: u32,
}

#[derive(Debug, Deserialize)]
struct ModeUpdate {
    mode: TransitionMode,
}

#[derive(Debug, Serialize)]
struct TimeStatus {
    #[serde(rename = "timeSynced")]
    time_synced: bool,
    timezone: String,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
    day: Option<DayOfWeek>,
    #[serde(rename = "timeOfDay")]
    time_of_day: Option<u32>,
    #[serde(rename = "uptimeMs")]
    uptime_ms: u64,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::from_env();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize(OUTPUT_CHANNELS);

    let timezone: Tz = runtime.timezone.parse().unwrap_or_else(|_| {
        warn!("unknown timezone '{}', using UTC", runtime.timezone);
        Tz::UTC
    });

    let schedule = load_schedule(&store).await;
    let mut lights = ScheduledOutputs::new(
        schedule,
        runtime.schedule.transition,
        SimulatedPwm::default(),
        runtime.schedule.channel_names.clone(),
    );
    match store.load_channel_state().await {
        Ok(state) => lights.restore_channel_times(&state.channel_times),
        Err(err) => warn!("failed to load channel state from store: {err:#}"),
    }

    let outputs: SharedDevice = Arc::new(Mutex::new(Device::ScheduledOutputs(lights)));
    let mut devices = vec![Arc::clone(&outputs)];
    let mut intervals = vec![runtime.schedule.interval()];
    if let Some(probe) = temperature_probe(&runtime.temperature) {
        devices.push(Arc::new(Mutex::new(probe)));
        intervals.push(runtime.temperature.interval());
    }
    if let Some(scale) = load_cell(&runtime.scale) {
        devices.push(Arc::new(Mutex::new(scale)));
        intervals.push(runtime.scale.interval());
    }

    let pool = TaskPool::<TASK_POOL_CAPACITY>::with_timing(runtime.task_pool.timing());
    let mut tasks: Vec<TaskHandle> = Vec::with_capacity(devices.len());
    for (device, interval) in devices.iter().zip(intervals) {
        tasks.push(post_driver_task(&pool, Arc::clone(device), interval, timezone)?);
    }
    let mut worker = pool
        .spawn_worker("smartaq-tasks")
        .context("failed to start task pool worker")?;

    let app_state = AppState {
        devices: Arc::new(devices),
        outputs,
        pool,
        timezone,
        started: Instant::now(),
        store,
    };

    spawn_channel_state_loop(
        app_state.clone(),
        Duration::from_millis(runtime.schedule.state_save_interval_ms),
    );

    let app = Router::new()
        .route("/api/devices", get(handle_get_devices))
        .route("/api/tasks", get(handle_get_tasks))
        .route("/api/channels", get(handle_get_channels))
        .route(
            "/api/schedule",
            get(handle_get_schedule).put(handle_put_schedule),
        )
        .route(
            "/api/schedule/points",
            post(handle_post_time_point).delete(handle_delete_time_point),
        )
        .route("/api/schedule/mode", put(handle_put_mode))
        .route("/api/time", get(handle_get_time))
        .with_state(app_state.clone());

    let port = std::env::var("SMARTAQ_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    drop(tasks);
    worker.stop();
    persist_channel_state(&app_state, true).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}

async fn load_schedule(store: &AppStore) -> LightSchedule {
    let entries = store.load_schedule().await.unwrap_or_else(|err| {
        warn!("failed to load schedule from store: {err:#}");
        Vec::new()
    });
    LightSchedule::from_entries(entries).unwrap_or_else(|err| {
        warn!("stored schedule is invalid, starting empty: {err}");
        LightSchedule::new()
    })
}

fn temperature_probe(config: &SensorConfig) -> Option<Device> {
    config.enabled.then(|| {
        let source = Waveform::new(25.0, 0.4, Duration::from_secs(3_600)).with_spikes(97, 15.0);
        Device::TemperatureProbe(TemperatureProbe::new(source, config.sample))
    })
}

fn load_cell(config: &SensorConfig) -> Option<Device> {
    config.enabled.then(|| {
        let source = Waveform::new(84_000.0, 40.0, Duration::from_secs(600));
        let calibration = ScaleCalibration {
            offset: 8_000,
            scale: 38.0,
        };
        Device::Scale(LoadCell::new(source, calibration, config.sample))
    })
}

fn post_driver_task(
    pool: &TaskPool<TASK_POOL_CAPACITY>,
    device: SharedDevice,
    interval: Duration,
    timezone: Tz,
) -> anyhow::Result<TaskHandle> {
    let name = lock_device(&device).name();
    let handle = pool.post_task(TaskDescription::periodic(
        format!("update {name}"),
        interval,
        move || {
            let tick = Tick {
                at: Instant::now(),
                local_time: local_week_time(Utc::now(), timezone),
            };
            if let Err(err) = lock_device(&device).update(&tick) {
                warn!("{name} update failed: {err}");
            }
        },
    ));

    if !handle.is_valid() {
        bail!("task pool is full, cannot schedule {name}");
    }
    Ok(handle)
}

fn spawn_channel_state_loop(app_state: AppState, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            persist_channel_state(&app_state, false).await;
        }
    });
}

async fn persist_channel_state(state: &AppState, force: bool) {
    let channel_times = {
        let mut device = lock_device(&state.outputs);
        let Some(outputs) = device.as_outputs_mut() else {
            return;
        };
        match outputs.take_dirty_channel_times() {
            Some(times) => times,
            None if force => outputs.channel_times(),
            None => return,
        }
    };

    debug!("saving channel times {channel_times:?}");
    if let Err(err) = state
        .store
        .save_channel_state(&ChannelState { channel_times })
        .await
    {
        warn!("failed to persist channel state: {err:#}");
    }
}

async fn handle_get_devices(State(state): State<AppState>) -> impl IntoResponse {
    let views: Vec<DeviceView> = state
        .devices
        .iter()
        .map(|device| {
            let device = lock_device(device);
            DeviceView {
                name: device.name(),
                reading: device.read(),
            }
        })
        .collect();
    Json(views)
}

async fn handle_get_tasks(State(state): State<AppState>) -> impl IntoResponse {
    let now = Instant::now();
    let views: Vec<TaskView> = state
        .pool
        .tasks()
        .into_iter()
        .map(|task| TaskView {
            id: task.id.get(),
            description: task.description,
            single_shot: task.single_shot,
            interval_ms: duration_ms(task.interval),
            last_run_ago_ms: task
                .last_executed
                .map(|last| duration_ms(now.saturating_duration_since(last))),
        })
        .collect();
    Json(views)
}

async fn handle_get_channels(State(state): State<AppState>) -> impl IntoResponse {
    Json(lock_device(&state.outputs).read())
}

async fn handle_get_schedule(State(state): State<AppState>) -> impl IntoResponse {
    match schedule_view(&state) {
        Some(view) => Json(view).into_response(),
        None => missing_outputs(),
    }
}

async fn handle_put_schedule(
    State(state): State<AppState>,
    Json(update): Json<ScheduleUpdate>,
) -> impl IntoResponse {
    let schedule = match LightSchedule::from_entries(update.entries) {
        Ok(schedule) => schedule,
        Err(err) => return schedule_error_response(&err),
    };

    {
        let mut device = lock_device(&state.outputs);
        let Some(outputs) = device.as_outputs_mut() else {
            return missing_outputs();
        };
        outputs.replace_schedule(schedule);
        if let Some(mode) = update.mode {
            outputs.set_mode(mode);
        }
    }

    if let Err(err) = persist_schedule(&state).await {
        warn!("failed to persist schedule update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist schedule",
        );
    }

    if let Some(mode) = update.mode {
        if let Err(err) = persist_mode(&state, mode).await {
            warn!("failed to persist transition mode: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist runtime settings",
            );
        }
    }

    handle_get_schedule(State(state)).await.into_response()
}

async fn handle_post_time_point(
    State(state): State<AppState>,
    Json(update): Json<TimePointUpdate>,
) -> impl IntoResponse {
    let channels = match channel_values(&update.channels) {
        Ok(channels) => channels,
        Err(err) => return schedule_error_response(&err),
    };

    {
        let mut device = lock_device(&state.outputs);
        let Some(outputs) = device.as_outputs_mut() else {
            return missing_outputs();
        };
        if let Err(err) = outputs.insert_time_point(update.day, update.time_of_day, channels) {
            return schedule_error_response(&err);
        }
    }

    if let Err(err) = persist_schedule(&state).await {
        warn!("failed to persist schedule update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist schedule",
        );
    }

    (StatusCode::CREATED, handle_get_schedule(State(state)).await).into_response()
}

async fn handle_delete_time_point(
    State(state): State<AppState>,
    Query(point): Query<TimePointRef>,
) -> impl IntoResponse {
    {
        let mut device = lock_device(&state.outputs);
        let Some(outputs) = device.as_outputs_mut() else {
            return missing_outputs();
        };
        if let Err(err) = outputs.remove_time_point(point.day, point.time_of_day) {
            return schedule_error_response(&err);
        }
    }

    if let Err(err) = persist_schedule(&state).await {
        warn!("failed to persist schedule update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist schedule",
        );
    }

    handle_get_schedule(State(state)).await.into_response()
}

async fn handle_put_mode(
    State(state): State<AppState>,
    Json(update): Json<ModeUpdate>,
) -> impl IntoResponse {
    {
        let mut device = lock_device(&state.outputs);
        let Some(outputs) = device.as_outputs_mut() else {
            return missing_outputs();
        };
        outputs.set_mode(update.mode);
    }

    if let Err(err) = persist_mode(&state, update.mode).await {
        warn!("failed to persist transition mode: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }

    handle_get_schedule(State(state)).await.into_response()
}

async fn handle_get_time(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    let local = local_week_time(now, state.timezone);
    Json(TimeStatus {
        time_synced: local.is_some(),
        timezone: state.timezone.name().to_string(),
        now_epoch: now.timestamp(),
        day: local.map(|time| time.day),
        time_of_day: local.map(|time| time.time_of_day),
        uptime_ms: duration_ms(state.started.elapsed()),
    })
}

fn schedule_view(state: &AppState) -> Option<ScheduleView> {
    let device = lock_device(&state.outputs);
    let outputs = device.as_outputs()?;
    Some(ScheduleView {
        mode: outputs.mode(),
        entries: outputs.schedule().entries(),
    })
}

async fn persist_schedule(state: &AppState) -> anyhow::Result<()> {
    let entries = schedule_view(state)
        .map(|view| view.entries)
        .unwrap_or_default();
    state.store.save_schedule(&entries).await
}

async fn persist_mode(state: &AppState, mode: TransitionMode) -> anyhow::Result<()> {
    let mut runtime = state.store.load_runtime_config().await?;
    runtime.schedule.transition = mode;
    state.store.save_runtime_config(&runtime).await
}

fn channel_values(values: &[Option<f32>]) -> Result<[Option<f32>; OUTPUT_CHANNELS], ScheduleError> {
    if values.len() > OUTPUT_CHANNELS {
        return Err(ScheduleError::InvalidChannel(values.len() - 1));
    }
    let mut channels = [None; OUTPUT_CHANNELS];
    channels[..values.len()].copy_from_slice(values);
    Ok(channels)
}

fn schedule_error_status(err: &ScheduleError) -> StatusCode {
    match err.kind() {
        ScheduleError::DayFull | ScheduleError::DuplicateTime(_) => StatusCode::CONFLICT,
        ScheduleError::TimeNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn schedule_error_response(err: &ScheduleError) -> axum::response::Response {
    error_response(schedule_error_status(err), &err.to_string())
}

fn missing_outputs() -> axum::response::Response {
    error_response(StatusCode::NOT_FOUND, "No scheduled outputs configured")
}

fn local_week_time(now: DateTime<Utc>, timezone: Tz) -> Option<WeekTime> {
    let local = now.with_timezone(&timezone);
    (local.year() >= MIN_SYNCED_YEAR).then(|| WeekTime::from_datetime(&local))
}

fn lock_device(device: &SharedDevice) -> MutexGuard<'_, Device> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
