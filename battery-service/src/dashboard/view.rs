use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    io,
};

use battery_client::domain::{BatteryUnit, Snapshot, UnitStatus};
use serde::Serialize;

use super::filter::{FilterState, UNSPECIFIED};

pub const DURATION_BINS: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub total_power_kw: f64,
    pub total_capacity_kwh: f64,
    pub mean_power_kw: f64,
    pub mean_capacity_kwh: f64,
    pub mean_duration_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lo: f64,
    pub hi: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartData {
    pub by_status: Vec<GroupCount>,
    pub by_bundesland: Vec<GroupCount>,
    pub by_technology: Vec<GroupCount>,
    pub by_power_category: Vec<GroupCount>,
    pub duration_histogram: Vec<HistogramBin>,
}

/// A record with usable coordinates, as drawn on the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapPoint<'a> {
    pub unit_id: &'a str,
    pub name: &'a str,
    pub owner: &'a str,
    pub status: UnitStatus,
    pub latitude: f64,
    pub longitude: f64,
    pub power_kw: f64,
    pub capacity_kwh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredView<'a> {
    pub records: Vec<&'a BatteryUnit>,
    pub summary: Summary,
    pub chart_data: ChartData,
    pub map_points: Vec<MapPoint<'a>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Owner,
    Status,
    Power,
    Capacity,
    Duration,
    Bundesland,
    CommissioningDate,
}

impl SortKey {
    pub fn from_param(s: &str) -> Option<Self> {
        match s.trim() {
            "name" => Some(Self::Name),
            "owner" => Some(Self::Owner),
            "status" => Some(Self::Status),
            "power_kw" => Some(Self::Power),
            "capacity_kwh" => Some(Self::Capacity),
            "duration_hours" => Some(Self::Duration),
            "bundesland" => Some(Self::Bundesland),
            "commissioning_date" => Some(Self::CommissioningDate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSort {
    pub key: SortKey,
    pub descending: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ViewOptions {
    /// Keep only the K largest Bundesland groups; `None` keeps all, ranked.
    pub top_k_bundeslaender: Option<usize>,
    pub sort: Option<TableSort>,
}

/// Units matching every predicate of `state`, in snapshot order.
pub fn filter_units<'a>(snapshot: &'a Snapshot, state: &FilterState) -> Vec<&'a BatteryUnit> {
    snapshot.units.iter().filter(|u| state.matches(u)).collect()
}

pub fn summarize(records: &[&BatteryUnit]) -> Summary {
    if records.is_empty() {
        return Summary::default();
    }

    let n = records.len() as f64;
    let total_power_kw: f64 = records.iter().map(|u| u.power_kw).sum();
    let total_capacity_kwh: f64 = records.iter().map(|u| u.capacity_kwh).sum();
    let total_duration: f64 = records.iter().map(|u| u.duration_hours()).sum();

    Summary {
        count: records.len(),
        total_power_kw,
        total_capacity_kwh,
        mean_power_kw: total_power_kw / n,
        mean_capacity_kwh: total_capacity_kwh / n,
        mean_duration_hours: total_duration / n,
    }
}

/// Counts per label, largest first; equal counts ordered by label.
pub fn group_counts<'a, I>(labels: I) -> Vec<GroupCount>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(label).or_default() += 1;
    }

    let mut out: Vec<GroupCount> = counts
        .into_iter()
        .map(|(label, count)| GroupCount {
            label: label.to_string(),
            count,
        })
        .collect();
    // Stable sort over label-ordered input keeps ties alphabetical.
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out
}

pub fn duration_histogram(records: &[&BatteryUnit], bins: usize) -> Vec<HistogramBin> {
    let durations: Vec<f64> = records.iter().map(|u| u.duration_hours()).collect();
    let (Some(min), Some(max)) = (
        durations.iter().copied().reduce(f64::min),
        durations.iter().copied().reduce(f64::max),
    ) else {
        return Vec::new();
    };

    if bins == 0 || min == max {
        return vec![HistogramBin {
            lo: min,
            hi: max,
            count: durations.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lo: min + width * i as f64,
            hi: if i + 1 == bins { max } else { min + width * (i + 1) as f64 },
            count: 0,
        })
        .collect();
    for d in durations {
        let idx = (((d - min) / width).floor() as usize).min(bins - 1);
        out[idx].count += 1;
    }
    out
}

pub fn chart_data(records: &[&BatteryUnit], top_k_bundeslaender: Option<usize>) -> ChartData {
    let mut by_bundesland = group_counts(records.iter().map(|u| u.bundesland_label()));
    if let Some(k) = top_k_bundeslaender {
        by_bundesland.truncate(k);
    }

    ChartData {
        by_status: group_counts(records.iter().map(|u| u.status.as_str())),
        by_bundesland,
        by_technology: group_counts(records.iter().map(|u| u.technology.as_str())),
        by_power_category: group_counts(records.iter().map(|u| u.power_category().label())),
        duration_histogram: duration_histogram(records, DURATION_BINS),
    }
}

pub fn map_points<'a>(records: &[&'a BatteryUnit]) -> Vec<MapPoint<'a>> {
    records
        .iter()
        .copied()
        .filter_map(|u| {
            let (latitude, longitude) = u.coordinates()?;
            Some(MapPoint {
                unit_id: &u.unit_id,
                name: &u.name,
                owner: &u.owner,
                status: u.status,
                latitude,
                longitude,
                power_kw: u.power_kw,
                capacity_kwh: u.capacity_kwh,
            })
        })
        .collect()
}

fn compare(a: &BatteryUnit, b: &BatteryUnit, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::Owner => a.owner.cmp(&b.owner),
        SortKey::Status => a.status.cmp(&b.status),
        SortKey::Power => a.power_kw.total_cmp(&b.power_kw),
        SortKey::Capacity => a.capacity_kwh.total_cmp(&b.capacity_kwh),
        SortKey::Duration => a.duration_hours().total_cmp(&b.duration_hours()),
        SortKey::Bundesland => a.bundesland_label().cmp(b.bundesland_label()),
        SortKey::CommissioningDate => a.commissioning_date.cmp(&b.commissioning_date),
    }
}

/// Sorts table rows; ties always fall back to ascending `unit_id`.
pub fn sort_records(records: &mut [&BatteryUnit], sort: TableSort) {
    records.sort_by(|a, b| {
        let primary = compare(a, b, sort.key);
        let primary = if sort.descending { primary.reverse() } else { primary };
        primary.then_with(|| a.unit_id.cmp(&b.unit_id))
    });
}

/// Filter, sort, summarize and group in one synchronous pass. Same inputs,
/// same output: no clocks, no randomness, no hash-ordered maps.
pub fn compute_view<'a>(snapshot: &'a Snapshot, state: &FilterState, options: &ViewOptions) -> FilteredView<'a> {
    let mut records = filter_units(snapshot, state);
    if let Some(sort) = options.sort {
        sort_records(&mut records, sort);
    }

    FilteredView {
        summary: summarize(&records),
        chart_data: chart_data(&records, options.top_k_bundeslaender),
        map_points: map_points(&records),
        records,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

/// Choices and slider bounds for the sidebar, over the whole snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOptions {
    pub statuses: Vec<UnitStatus>,
    pub bundeslaender: Vec<String>,
    pub owners: Vec<String>,
    pub technologies: Vec<String>,
    pub network_operators: Vec<String>,
    pub power_kw: Bounds,
    pub capacity_kwh: Bounds,
    pub duration_hours: Bounds,
}

/// Sorted distinct values; empty strings are listed as `UNSPECIFIED`.
fn distinct<'a, I: IntoIterator<Item = &'a str>>(values: I) -> Vec<String> {
    values
        .into_iter()
        .map(|v| if v.is_empty() { UNSPECIFIED } else { v })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn bounds<I: IntoIterator<Item = f64>>(values: I) -> Bounds {
    let mut it = values.into_iter();
    match it.next() {
        None => Bounds { min: 0.0, max: 0.0 },
        Some(first) => it.fold(Bounds { min: first, max: first }, |b, v| Bounds {
            min: b.min.min(v),
            max: b.max.max(v),
        }),
    }
}

pub fn filter_options(snapshot: &Snapshot) -> FilterOptions {
    let units = &snapshot.units;
    FilterOptions {
        statuses: units.iter().map(|u| u.status).collect::<BTreeSet<_>>().into_iter().collect(),
        bundeslaender: distinct(units.iter().map(|u| u.bundesland_label())),
        owners: distinct(units.iter().map(|u| u.owner.as_str())),
        technologies: distinct(units.iter().map(|u| u.technology.as_str())),
        network_operators: distinct(units.iter().map(|u| u.network_operator.as_str())),
        power_kw: bounds(units.iter().map(|u| u.power_kw)),
        capacity_kwh: bounds(units.iter().map(|u| u.capacity_kwh)),
        duration_hours: bounds(units.iter().map(|u| u.duration_hours())),
    }
}

/// CSV export of table rows, in the order given.
pub fn write_csv<W: io::Write>(records: &[&BatteryUnit], writer: W) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "unit_id",
        "name",
        "owner",
        "status",
        "power_kw",
        "capacity_kwh",
        "duration_hours",
        "technology",
        "bundesland",
        "municipality",
        "network_operator",
        "latitude",
        "longitude",
        "commissioning_date",
    ])?;

    let opt_f64 = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for u in records {
        wtr.write_record([
            u.unit_id.clone(),
            u.name.clone(),
            u.owner.clone(),
            u.status.to_string(),
            u.power_kw.to_string(),
            u.capacity_kwh.to_string(),
            format!("{:.2}", u.duration_hours()),
            u.technology.clone(),
            u.bundesland_label().to_string(),
            u.municipality.clone().unwrap_or_default(),
            u.network_operator.clone(),
            opt_f64(u.latitude),
            opt_f64(u.longitude),
            u.commissioning_date.map(|d| d.to_string()).unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::filter::{FilterEvent, Selection};
    use battery_client::domain::Bundesland;
    use time::macros::datetime;

    fn unit(id: &str, status: UnitStatus, power_kw: f64, land: Option<Bundesland>) -> BatteryUnit {
        BatteryUnit {
            unit_id: id.to_string(),
            name: format!("Speicher {id}"),
            owner: format!("Owner {id}"),
            status,
            power_kw,
            capacity_kwh: power_kw * 2.0,
            technology: "Lithium-Batterie".to_string(),
            bundesland: land,
            latitude: Some(51.0),
            longitude: Some(10.0),
            commissioning_date: None,
            planned_commissioning_date: None,
            network_operator: String::new(),
            municipality: None,
        }
    }

    fn snapshot() -> Snapshot {
        let mut no_coords = unit("C", UnitStatus::Planned, 6000.0, Some(Bundesland::Bayern));
        no_coords.latitude = None;
        Snapshot::new(
            datetime!(2025-01-01 00:00:00 UTC),
            vec![
                unit("A", UnitStatus::Operating, 500.0, Some(Bundesland::Bayern)),
                unit("B", UnitStatus::Operating, 2000.0, Some(Bundesland::Berlin)),
                no_coords,
            ],
        )
    }

    fn only(statuses: &[UnitStatus]) -> FilterState {
        let mut state = FilterState::default();
        state
            .apply(FilterEvent::SetStatuses(statuses.iter().copied().collect()))
            .unwrap();
        state
    }

    #[test]
    fn status_selection_filters_records_and_summary() {
        let s = snapshot();
        let view = compute_view(&s, &only(&[UnitStatus::Operating]), &ViewOptions::default());

        assert_eq!(view.records.len(), 2);
        assert_eq!(view.summary.count, 2);
        assert_eq!(view.summary.total_power_kw, 2500.0);
        assert_eq!(view.summary.mean_power_kw, 1250.0);
        assert_eq!(view.summary.mean_duration_hours, 2.0);
    }

    #[test]
    fn empty_selection_yields_all_zero_summary() {
        let s = snapshot();
        let view = compute_view(&s, &only(&[]), &ViewOptions::default());

        assert!(view.records.is_empty());
        assert_eq!(view.summary, Summary::default());
        assert!(view.chart_data.by_status.is_empty());
        assert!(view.chart_data.duration_histogram.is_empty());
        assert!(view.map_points.is_empty());
    }

    #[test]
    fn records_are_a_subset_of_the_snapshot() {
        let s = snapshot();
        let mut state = FilterState::default();
        state
            .apply(FilterEvent::SelectBundesland(Selection::Only("Bayern".to_string())))
            .unwrap();
        let view = compute_view(&s, &state, &ViewOptions::default());

        assert!(view.records.len() <= s.units.len());
        assert!(view.records.iter().all(|r| s.units.contains(*r)));
        assert_eq!(view.records.len(), 2);
    }

    #[test]
    fn identical_inputs_serialize_identically() {
        let s = snapshot();
        let state = FilterState::default();
        let opts = ViewOptions {
            top_k_bundeslaender: Some(1),
            sort: Some(TableSort {
                key: SortKey::Power,
                descending: true,
            }),
        };

        let a = serde_json::to_vec(&compute_view(&s, &state, &opts)).unwrap();
        let b = serde_json::to_vec(&compute_view(&s, &state, &opts)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn groups_rank_by_count_then_label_and_respect_top_k() {
        let s = snapshot();
        let all: Vec<&BatteryUnit> = s.units.iter().collect();
        let charts = chart_data(&all, Some(1));

        assert_eq!(
            charts.by_bundesland,
            vec![GroupCount {
                label: "Bayern".to_string(),
                count: 2
            }]
        );
        assert_eq!(
            charts.by_status,
            vec![
                GroupCount {
                    label: "Operating".to_string(),
                    count: 2
                },
                GroupCount {
                    label: "Planned".to_string(),
                    count: 1
                },
            ]
        );
        assert_eq!(charts.by_power_category[0].label, "1-10 MW");
        assert_eq!(charts.by_technology[0].count, 3);
    }

    #[test]
    fn unknown_bundesland_groups_under_placeholder() {
        let units = [unit("X", UnitStatus::Planned, 1.0, None)];
        let refs: Vec<&BatteryUnit> = units.iter().collect();
        assert_eq!(chart_data(&refs, None).by_bundesland[0].label, "Unbekannt");
    }

    #[test]
    fn map_points_skip_missing_coordinates_but_stats_keep_them() {
        let s = snapshot();
        let view = compute_view(&s, &FilterState::default(), &ViewOptions::default());

        assert_eq!(view.summary.count, 3);
        let ids: Vec<_> = view.map_points.iter().map(|p| p.unit_id).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn sorting_is_stable_on_unit_id() {
        let s = snapshot();
        let mut records: Vec<&BatteryUnit> = s.units.iter().collect();
        sort_records(
            &mut records,
            TableSort {
                key: SortKey::Status,
                descending: true,
            },
        );
        let ids: Vec<_> = records.iter().map(|u| u.unit_id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A", "B"]);
    }

    #[test]
    fn histogram_covers_all_records() {
        let s = snapshot();
        let mut long = unit("D", UnitStatus::Operating, 100.0, None);
        long.capacity_kwh = 800.0;

        let mut records: Vec<&BatteryUnit> = s.units.iter().collect();
        let bins = duration_histogram(&records, DURATION_BINS);
        // All durations equal two hours: one bin.
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].count, 3);

        records.push(&long);
        let bins = duration_histogram(&records, DURATION_BINS);
        assert_eq!(bins.len(), DURATION_BINS);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 4);
        assert_eq!(bins[DURATION_BINS - 1].count, 1);
    }

    #[test]
    fn options_list_distinct_values_and_bounds() {
        let opts = filter_options(&snapshot());
        assert_eq!(opts.bundeslaender, vec!["Bayern", "Berlin"]);
        assert_eq!(opts.statuses, vec![UnitStatus::Operating, UnitStatus::Planned]);
        assert_eq!(opts.power_kw, Bounds { min: 500.0, max: 6000.0 });
        assert_eq!(opts.network_operators, vec![UNSPECIFIED]);
    }

    #[test]
    fn csv_has_header_and_one_row_per_record() {
        let s = snapshot();
        let records: Vec<&BatteryUnit> = s.units.iter().collect();
        let mut buf = Vec::new();
        write_csv(&records, &mut buf).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("unit_id,name,owner,status"));
        assert!(lines[1].starts_with("A,Speicher A,Owner A,Operating,500,1000,2.00"));
    }
}
