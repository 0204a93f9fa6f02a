//! Rendering of a wizard state into a form: a title, options and an
//! optional localized error.

use civis_core::{plan_entities, render_value, BridgeError, row_display_name, EntityKind, Language, ResourceFormat, Row};
use civis_formats::{field_candidates, Normalized};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::i18n::Translations;
use crate::state::{build_binding, Discovery, Step, WizardPolicy, WizardState, UNAVAILABLE_PREFIX};

/// Cells shown in a tabular row label.
const ROW_LABEL_CELLS: usize = 3;

static FORMAT_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\(Formato [^)]+\)").expect("static regex"));

/// Resource name without the portal's `(Formato X)` suffix.
pub fn clean_resource_name(name: &str) -> String { FORMAT_SUFFIX.replace_all(name, "").trim().to_string() }

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Choice {
    pub value: String,
    pub label: String,
    pub selectable: bool,
}

impl Choice {
    fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self { value: value.into(), label: label.into(), selectable: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Form {
    pub step: Step,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub options: Vec<Choice>,
    /// Several options may be picked at once.
    pub multiple: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preview: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

fn step_key(step: Step) -> &'static str {
    match step {
        Step::Language => "language",
        Step::Group => "group",
        Step::Package => "package",
        Step::Resource => "resource",
        Step::Rows => "rows",
        Step::Fields => "fields",
        Step::Confirm => "confirm",
        Step::Done => "done",
    }
}

pub fn render(state: &WizardState, disc: &Discovery, policy: &WizardPolicy, tr: &Translations) -> Form {
    let lang = state.language;
    let key = step_key(state.step);
    let description_key = format!("steps.{key}.description");
    let description = Some(tr.text(lang, &description_key)).filter(|d| *d != description_key);
    let mut form = Form {
        step: state.step,
        title: tr.text(lang, &format!("steps.{key}.title")),
        description,
        options: Vec::new(),
        multiple: state.step == Step::Fields,
        preview: Vec::new(),
        error: None,
        error_code: None,
    };

    match state.step {
        Step::Language => {
            form.options = Language::ALL.iter().map(|l| Choice::new(l.code(), l.native_name())).collect();
        }
        Step::Group => {
            if let Some(groups) = disc.groups(lang) {
                form.options = groups.iter().map(|g| Choice::new(&g.id, g.label(lang))).collect();
            }
        }
        Step::Package => {
            let group = state.group_id.as_deref().unwrap_or_default();
            if let Some(packages) = disc.packages(lang, group) {
                form.options = packages.iter().map(|p| Choice::new(&p.id, &p.title)).collect();
            }
        }
        Step::Resource => {
            let package = state.package_id.as_deref().unwrap_or_default();
            for r in disc.resources(lang, package).unwrap_or_default() {
                let name = clean_resource_name(&r.name);
                let params = [("name", name.as_str()), ("format", r.format_tag.as_str())];
                form.options.push(if r.selectable() {
                    Choice::new(&r.id, tr.fill(lang, "labels.resource", &params))
                } else {
                    Choice {
                        value: format!("{UNAVAILABLE_PREFIX}{}", r.id),
                        label: tr.fill(lang, "labels.resource_unavailable", &params),
                        selectable: false,
                    }
                });
            }
        }
        Step::Rows => {
            if let Some((format, data)) = loaded(state, disc) {
                form.options = data
                    .rows
                    .iter()
                    .enumerate()
                    .map(|(idx, row)| Choice::new(format!("row_{idx}"), row_label(format, data, row, idx, tr, lang)))
                    .collect();
            }
        }
        Step::Fields => {
            if let (Some((format, data)), Some(idx)) = (loaded(state, disc), state.row) {
                if let Some(row) = data.rows.get(idx) {
                    form.options = field_candidates(format, row, data.columns.as_deref())
                        .into_iter()
                        .map(|c| Choice::new(c.token(), c.label))
                        .collect();
                }
            }
        }
        Step::Confirm => {
            form.options = vec![Choice::new("confirm", tr.text(lang, "labels.confirm"))];
            form.preview = preview(state, disc, policy, tr);
        }
        Step::Done => {}
    }

    if let Some(err) = &state.error {
        let code = err.reason();
        form.error_code = Some(code);
        form.error = Some(match err {
            BridgeError::SelectionLimit { count, max } => {
                let (count, max) = (count.to_string(), max.to_string());
                tr.fill(lang, "errors.too_many_sensors", &[("count", count.as_str()), ("max", max.as_str())])
            }
            _ => tr.text(lang, &format!("errors.{code}")),
        });
    }
    form
}

fn loaded<'a>(state: &WizardState, disc: &'a Discovery) -> Option<(ResourceFormat, &'a Normalized)> {
    let sel = state.resource.as_ref()?;
    Some((sel.format, disc.rows(&sel.url)?))
}

/// `Row n: col: val | ...` for tabular formats, else the row's display name.
fn row_label(format: ResourceFormat, data: &Normalized, row: &Row, idx: usize, tr: &Translations, lang: Language) -> String {
    match &data.columns {
        Some(cols) if format.is_tabular() => {
            let cells = cols
                .iter()
                .take(ROW_LABEL_CELLS)
                .map(|c| format!("{c}: {}", row.get(c).map(render_value).unwrap_or_default()))
                .collect::<Vec<_>>()
                .join(" | ");
            let n = (idx + 1).to_string();
            tr.fill(lang, "labels.row", &[("n", n.as_str()), ("cells", cells.as_str())])
        }
        _ => row_display_name(format, row, idx),
    }
}

fn preview(state: &WizardState, disc: &Discovery, policy: &WizardPolicy, tr: &Translations) -> Vec<String> {
    let Ok(binding) = build_binding(state, disc, policy) else { return Vec::new() };
    let lang = state.language;
    let specs = plan_entities(&binding);
    let mut out = Vec::with_capacity(specs.len() + 1);
    if binding.format == ResourceFormat::Wfs {
        let count = specs.len().to_string();
        out.push(tr.fill(lang, "labels.preview_wfs", &[("count", count.as_str())]));
    }
    for spec in specs {
        match &spec.kind {
            EntityKind::Sensor { row, selector } => {
                let value = binding
                    .snapshot
                    .get(*row)
                    .and_then(|r| r.resolve(selector))
                    .map(|v| render_value(&v))
                    .unwrap_or_else(|| "N/A".to_string());
                out.push(tr.fill(lang, "labels.preview_entity", &[("object_id", spec.object_id.as_str()), ("value", value.as_str())]));
            }
            EntityKind::Tracker { .. } => out.push(spec.name),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use civis_core::CatalogResource;
    use crate::state::SelectedResource;
    use serde_json::json;

    #[test]
    fn format_suffix_is_stripped() {
        assert_eq!(clean_resource_name("Stazioni meteo (Formato JSON)"), "Stazioni meteo");
        assert_eq!(clean_resource_name("Plain"), "Plain");
    }

    #[test]
    fn tabular_rows_show_three_cells() {
        let mut disc = Discovery::default();
        let row = |a: &str| Row::from_value(json!({"A": a, "B": 1, "C": null, "D": "x"})).unwrap();
        let data = Normalized { columns: Some(vec!["A".into(), "B".into(), "C".into(), "D".into()]), rows: vec![row("one")] };
        disc.store_rows("http://d/t.csv", data);
        let state = WizardState {
            step: Step::Rows,
            resource: Some(SelectedResource {
                resource: CatalogResource { id: "t".into(), name: "t".into(), format_tag: "CSV".into(), url: "http://d/t.csv".into() },
                format: ResourceFormat::Csv,
                url: "http://d/t.csv".into(),
            }),
            ..WizardState::default()
        };
        let form = render(&state, &disc, &WizardPolicy::default(), &Translations::embedded());
        assert_eq!(form.options[0].value, "row_0");
        assert_eq!(form.options[0].label, "Row 1: A: one | B: 1 | C: N/A");
    }

    #[test]
    fn limit_errors_are_filled() {
        let state = WizardState {
            step: Step::Fields,
            error: Some(BridgeError::SelectionLimit { count: 101, max: 100 }),
            ..WizardState::default()
        };
        let form = render(&state, &Discovery::default(), &WizardPolicy::default(), &Translations::embedded());
        assert!(form.multiple);
        assert_eq!(form.error_code, Some("too_many_sensors"));
        assert_eq!(form.error.as_deref(), Some("This selection would create 101 entities; the limit is 100."));
    }

    #[test]
    fn language_step_offers_every_language() {
        let form = render(&WizardState::default(), &Discovery::default(), &WizardPolicy::default(), &Translations::embedded());
        let values: Vec<&str> = form.options.iter().map(|c| c.value.as_str()).collect();
        assert_eq!(values, ["en", "it", "de", "rm"]);
        assert!(form.description.is_none());
    }
}
