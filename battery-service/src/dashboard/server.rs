use std::{
    collections::BTreeSet,
    fs, io,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::SystemTime,
};

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use battery_client::{
    domain::{Snapshot, UnitStatus},
    store::{load_latest, SnapshotError},
};
use serde::Deserialize;
use serde_json::json;

use super::{
    filter::{FilterEvent, FilterRangeError, FilterState, Selection, ALL},
    view::{compute_view, filter_options, write_csv, SortKey, TableSort, ViewOptions},
};

const INDEX_HTML: &str = include_str!("../../assets/dashboard.html");

/// File identity used to notice that the collector replaced the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

struct Loaded {
    stamp: FileStamp,
    snapshot: Arc<Snapshot>,
}

struct Shared {
    snapshot_path: PathBuf,
    /// `false` for a snapshot handed in directly; the file is then never read.
    watch_file: bool,
    top_k_bundeslaender: Option<usize>,
    loaded: RwLock<Option<Loaded>>,
}

/// Dashboard state. Each request sees whatever latest file is on disk: the
/// snapshot is re-read when the file's mtime or size changes, and a file
/// that appears after startup ends the empty state.
#[derive(Clone)]
pub struct AppState {
    shared: Arc<Shared>,
}

impl AppState {
    /// Reads the latest snapshot if one exists. A missing file is not fatal:
    /// the dashboard serves its empty state until the collector writes one.
    pub fn load(snapshot_path: PathBuf, top_k_bundeslaender: Option<usize>) -> Result<Self, SnapshotError> {
        let state = Self::watching(snapshot_path, top_k_bundeslaender);
        match state.current() {
            Ok(_) => {}
            Err(ApiError::NoData { path }) => {
                tracing::warn!(path = %path.display(), "no snapshot found; dashboard will show the empty state")
            }
            Err(ApiError::Load(e)) => return Err(e),
            Err(_) => {}
        }
        Ok(state)
    }

    pub fn with_snapshot(snapshot: Snapshot, top_k_bundeslaender: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                snapshot_path: PathBuf::new(),
                watch_file: false,
                top_k_bundeslaender,
                loaded: RwLock::new(Some(Loaded {
                    stamp: FileStamp { modified: None, len: 0 },
                    snapshot: Arc::new(snapshot),
                })),
            }),
        }
    }

    pub fn empty(snapshot_path: PathBuf) -> Self {
        Self::watching(snapshot_path, None)
    }

    fn watching(snapshot_path: PathBuf, top_k_bundeslaender: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                snapshot_path,
                watch_file: true,
                top_k_bundeslaender,
                loaded: RwLock::new(None),
            }),
        }
    }

    fn top_k_bundeslaender(&self) -> Option<usize> {
        self.shared.top_k_bundeslaender
    }

    fn no_data(&self) -> ApiError {
        ApiError::NoData {
            path: self.shared.snapshot_path.clone(),
        }
    }

    fn cached(&self) -> Option<(FileStamp, Arc<Snapshot>)> {
        let guard = self.shared.loaded.read().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|l| (l.stamp, l.snapshot.clone()))
    }

    fn store(&self, loaded: Option<Loaded>) {
        *self.shared.loaded.write().unwrap_or_else(|e| e.into_inner()) = loaded;
    }

    /// Snapshot for this request, reloading it when the file changed.
    fn current(&self) -> Result<Arc<Snapshot>, ApiError> {
        if !self.shared.watch_file {
            return self.cached().map(|(_, s)| s).ok_or_else(|| self.no_data());
        }

        let path = &self.shared.snapshot_path;
        let stamp = match fs::metadata(path) {
            Ok(meta) => FileStamp {
                modified: meta.modified().ok(),
                len: meta.len(),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.store(None);
                return Err(self.no_data());
            }
            Err(e) => {
                return Err(ApiError::Load(SnapshotError::Io {
                    path: path.clone(),
                    source: e,
                }))
            }
        };

        if let Some((cached_stamp, snapshot)) = self.cached() {
            if cached_stamp == stamp && stamp.modified.is_some() {
                return Ok(snapshot);
            }
        }

        match load_latest(path) {
            Ok(s) => {
                let snapshot = Arc::new(s);
                tracing::info!(
                    path = %path.display(),
                    units = snapshot.len(),
                    captured_at = %snapshot.captured_at,
                    "snapshot loaded"
                );
                self.store(Some(Loaded {
                    stamp,
                    snapshot: snapshot.clone(),
                }));
                Ok(snapshot)
            }
            Err(SnapshotError::NoData { .. }) => {
                self.store(None);
                Err(self.no_data())
            }
            Err(e) => Err(ApiError::Load(e)),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("no battery data found at {}; run the collector first", .path.display())]
    NoData { path: PathBuf },
    #[error(transparent)]
    Filter(#[from] FilterRangeError),
    #[error("unknown status '{0}'")]
    UnknownStatus(String),
    #[error("unknown sort column '{0}'")]
    UnknownSortKey(String),
    #[error("csv export failed: {0}")]
    Csv(String),
    #[error(transparent)]
    Load(SnapshotError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            Self::NoData { .. } => (StatusCode::NOT_FOUND, "no_data"),
            Self::Filter(_) => (StatusCode::BAD_REQUEST, "invalid_filter"),
            Self::UnknownStatus(_) | Self::UnknownSortKey(_) => (StatusCode::BAD_REQUEST, "invalid_parameter"),
            Self::Csv(_) => (StatusCode::INTERNAL_SERVER_ERROR, "export_failed"),
            Self::Load(_) => (StatusCode::INTERNAL_SERVER_ERROR, "snapshot_unreadable"),
        };
        (status, Json(json!({ "error": kind, "message": self.to_string() }))).into_response()
    }
}

/// Sidebar controls as query parameters. Statuses are comma-separated.
#[derive(Debug, Default, Deserialize)]
pub struct ViewQuery {
    pub status: Option<String>,
    pub power_min: Option<f64>,
    pub power_max: Option<f64>,
    pub capacity_min: Option<f64>,
    pub capacity_max: Option<f64>,
    pub duration_min: Option<f64>,
    pub duration_max: Option<f64>,
    pub bundesland: Option<String>,
    pub owner: Option<String>,
    pub technology: Option<String>,
    pub network_operator: Option<String>,
    pub sort: Option<String>,
    #[serde(default)]
    pub desc: bool,
}

fn range_event(
    min: Option<f64>,
    max: Option<f64>,
    make: fn(f64, f64) -> FilterEvent,
) -> Option<FilterEvent> {
    if min.is_none() && max.is_none() {
        return None;
    }
    Some(make(
        min.unwrap_or(f64::NEG_INFINITY),
        max.unwrap_or(f64::INFINITY),
    ))
}

impl ViewQuery {
    /// Translates the query into control events. Absent parameters leave
    /// the control at its default.
    pub fn events(&self) -> Result<Vec<FilterEvent>, ApiError> {
        let mut events = Vec::new();

        if let Some(raw) = &self.status {
            if raw.trim() != ALL {
                let statuses = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| UnitStatus::from_name(s).ok_or_else(|| ApiError::UnknownStatus(s.to_string())))
                    .collect::<Result<BTreeSet<_>, _>>()?;
                events.push(FilterEvent::SetStatuses(statuses));
            }
        }

        events.extend(range_event(self.power_min, self.power_max, |lo, hi| {
            FilterEvent::SetPowerRange { lo, hi }
        }));
        events.extend(range_event(self.capacity_min, self.capacity_max, |lo, hi| {
            FilterEvent::SetCapacityRange { lo, hi }
        }));
        events.extend(range_event(self.duration_min, self.duration_max, |lo, hi| {
            FilterEvent::SetDurationRange { lo, hi }
        }));

        events.push(FilterEvent::SelectBundesland(Selection::from_param(self.bundesland.as_deref())));
        events.push(FilterEvent::SelectOwner(Selection::from_param(self.owner.as_deref())));
        events.push(FilterEvent::SelectTechnology(Selection::from_param(self.technology.as_deref())));
        events.push(FilterEvent::SelectNetworkOperator(Selection::from_param(
            self.network_operator.as_deref(),
        )));

        Ok(events)
    }

    /// Fresh session state with every event applied. Invalid ranges stop here
    /// and never reach the aggregation code.
    pub fn filter_state(&self) -> Result<FilterState, ApiError> {
        let mut state = FilterState::default();
        for event in self.events()? {
            state.apply(event)?;
        }
        Ok(state)
    }

    pub fn table_sort(&self) -> Result<Option<TableSort>, ApiError> {
        match self.sort.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(key) => SortKey::from_param(key)
                .map(|key| {
                    Some(TableSort {
                        key,
                        descending: self.desc,
                    })
                })
                .ok_or_else(|| ApiError::UnknownSortKey(key.to_string())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/options", get(options))
        .route("/api/view", get(view))
        .route("/api/units.csv", get(units_csv))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn options(State(state): State<AppState>) -> Result<Response, ApiError> {
    let snapshot = state.current()?;
    let body = json!({
        "captured_at": snapshot.captured_at.to_string(),
        "total_units": snapshot.len(),
        "options": filter_options(&snapshot),
    });
    Ok(Json(body).into_response())
}

async fn view(State(state): State<AppState>, Query(query): Query<ViewQuery>) -> Result<Response, ApiError> {
    metrics::counter!("dashboard_view_requests_total").increment(1);

    let snapshot = state.current()?;
    let filter = query.filter_state()?;
    let options = ViewOptions {
        top_k_bundeslaender: state.top_k_bundeslaender(),
        sort: query.table_sort()?,
    };

    let view = compute_view(&snapshot, &filter, &options);
    tracing::debug!(records = view.records.len(), "view recomputed");
    Ok(Json(view).into_response())
}

async fn units_csv(State(state): State<AppState>, Query(query): Query<ViewQuery>) -> Result<Response, ApiError> {
    let snapshot = state.current()?;
    let filter = query.filter_state()?;
    let options = ViewOptions {
        top_k_bundeslaender: None,
        sort: query.table_sort()?,
    };
    let view = compute_view(&snapshot, &filter, &options);

    let mut buf = Vec::new();
    write_csv(&view.records, &mut buf).map_err(|e| ApiError::Csv(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"battery_units.csv\""),
        ],
        buf,
    )
        .into_response())
}

/// Binds and serves until the process is stopped.
pub async fn serve(bind_addr: &str, app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid dashboard bind address {bind_addr}: {e}"))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "dashboard listening on http://{addr}/");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
