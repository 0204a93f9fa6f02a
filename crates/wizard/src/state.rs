//! The selection machine: immutable per-step state and a pure transition
//! function. Network access happens only in the driver, which answers
//! [`Effect::Load`] with [`Event::Loaded`] or [`Event::Failed`].

use std::collections::HashMap;

use civis_core::{
    BridgeError, CatalogGroup, CatalogPackage, CatalogResource, EmptyReason, FieldSelector, Language, ResourceBinding,
    ResourceFormat, RowSelection, Settings,
};
use civis_formats::{field_candidates, Normalized};
use serde::Serialize;

use crate::form::clean_resource_name;

/// Prefix of option values for resources that cannot be selected.
pub const UNAVAILABLE_PREFIX: &str = "unavailable:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Language,
    Group,
    Package,
    Resource,
    Rows,
    Fields,
    Confirm,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedResource {
    pub resource: CatalogResource,
    pub format: ResourceFormat,
    /// Canonical URL (language and WFS parameters applied).
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WizardState {
    pub step: Step,
    pub language: Language,
    pub group_id: Option<String>,
    pub package_id: Option<String>,
    pub resource: Option<SelectedResource>,
    pub row: Option<usize>,
    pub fields: Vec<FieldSelector>,
    pub error: Option<BridgeError>,
}

impl Default for WizardState {
    fn default() -> Self {
        Self {
            step: Step::Language,
            language: Language::En,
            group_id: None,
            package_id: None,
            resource: None,
            row: None,
            fields: Vec::new(),
            error: None,
        }
    }
}

impl WizardState {
    /// Rewind to `step`, clearing the selection made there and everything after it.
    fn rewind(&mut self, step: Step) {
        self.step = step;
        let order = [Step::Group, Step::Package, Step::Resource, Step::Rows, Step::Fields];
        for s in order.iter().skip_while(|s| **s != step) {
            match s {
                Step::Group => self.group_id = None,
                Step::Package => self.package_id = None,
                Step::Resource => self.resource = None,
                Step::Rows => self.row = None,
                Step::Fields => self.fields.clear(),
                _ => {}
            }
        }
    }
}

/// One answer to a rendered step.
#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    Language(Language),
    Group(String),
    Package(String),
    /// Resource id, or an `unavailable:<id>` value.
    Resource(String),
    /// `row_<idx>`
    Row(String),
    /// `"<kind>:<key>"` tokens.
    Fields(Vec<String>),
    Confirm,
    Back,
}

/// Data a step needs before it can render.
#[derive(Debug, Clone, PartialEq)]
pub enum Need {
    Groups,
    Packages(String),
    Resources(String),
    Rows(SelectedResource),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Show,
    Input(UserInput),
    Loaded(Need),
    Failed(Need, BridgeError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Render,
    Load(Need),
    /// Binding with `created_ts` left for the driver to stamp.
    Finish(ResourceBinding),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WizardPolicy {
    /// Entity ceiling for one binding.
    pub max_entities: usize,
    /// Features kept from a WFS fetch before the ceiling applies.
    pub wfs_fetch_cap: usize,
}

impl Default for WizardPolicy {
    fn default() -> Self { Self { max_entities: 100, wfs_fetch_cap: 500 } }
}

impl WizardPolicy {
    pub fn from_settings(s: &Settings) -> Self { Self { max_entities: s.max_entities, wfs_fetch_cap: s.wfs_fetch_cap } }
}

/// Per-run memo of everything fetched, keyed by the selection it belongs to
/// and valid for one language.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    language: Option<Language>,
    groups: Option<Vec<CatalogGroup>>,
    packages: HashMap<String, Vec<CatalogPackage>>,
    resources: HashMap<String, Vec<CatalogResource>>,
    rows: HashMap<String, Normalized>,
}

impl Discovery {
    /// Drop everything fetched in another language.
    pub fn for_language(&mut self, lang: Language) {
        if self.language != Some(lang) {
            *self = Self { language: Some(lang), ..Self::default() };
        }
    }

    fn valid(&self, lang: Language) -> bool { self.language == Some(lang) }

    pub fn groups(&self, lang: Language) -> Option<&[CatalogGroup]> {
        self.groups.as_deref().filter(|_| self.valid(lang))
    }

    pub fn packages(&self, lang: Language, group: &str) -> Option<&[CatalogPackage]> {
        self.packages.get(group).map(Vec::as_slice).filter(|_| self.valid(lang))
    }

    pub fn resources(&self, lang: Language, package: &str) -> Option<&[CatalogResource]> {
        self.resources.get(package).map(Vec::as_slice).filter(|_| self.valid(lang))
    }

    /// Rows keyed by canonical URL, which already carries the language.
    pub fn rows(&self, url: &str) -> Option<&Normalized> { self.rows.get(url) }

    pub fn store_groups(&mut self, groups: Vec<CatalogGroup>) { self.groups = Some(groups); }

    pub fn store_packages(&mut self, group: &str, packages: Vec<CatalogPackage>) {
        self.packages.insert(group.to_string(), packages);
    }

    pub fn store_resources(&mut self, package: &str, resources: Vec<CatalogResource>) {
        self.resources.insert(package.to_string(), resources);
    }

    pub fn store_rows(&mut self, url: &str, rows: Normalized) { self.rows.insert(url.to_string(), rows); }
}

/// Advance the machine by one event.
pub fn transition(state: &WizardState, event: Event, disc: &Discovery, policy: &WizardPolicy) -> (WizardState, Effect) {
    let mut next = state.clone();
    match event {
        Event::Show => enter(next, disc),
        Event::Loaded(need) => {
            next.error = None;
            match need {
                Need::Rows(sel) if next.step == Step::Resource && sel.format == ResourceFormat::Wfs => {
                    wfs_ready(next, disc, policy)
                }
                _ => enter(next, disc),
            }
        }
        Event::Failed(need, err) => {
            match need {
                Need::Groups => next.step = Step::Group,
                Need::Packages(_) => next.step = Step::Package,
                Need::Resources(_) => next.step = Step::Resource,
                Need::Rows(sel) if sel.format == ResourceFormat::Wfs => next.rewind(Step::Resource),
                Need::Rows(_) => next.step = Step::Rows,
            }
            next.error = Some(err);
            (next, Effect::Render)
        }
        Event::Input(input) => {
            next.error = None;
            on_input(next, input, disc, policy)
        }
    }
}

fn fail(mut next: WizardState, err: BridgeError) -> (WizardState, Effect) {
    next.error = Some(err);
    (next, Effect::Render)
}

fn invalid(next: WizardState, msg: impl Into<String>) -> (WizardState, Effect) {
    fail(next, BridgeError::Validation(msg.into()))
}

/// Render the current step, or ask for the data it needs first.
fn enter(mut next: WizardState, disc: &Discovery) -> (WizardState, Effect) {
    let lang = next.language;
    match next.step {
        Step::Group if disc.groups(lang).is_none() => (next, Effect::Load(Need::Groups)),
        Step::Package => {
            let Some(group) = next.group_id.clone() else {
                next.step = Step::Group;
                return enter(next, disc);
            };
            match disc.packages(lang, &group) {
                None => (next, Effect::Load(Need::Packages(group))),
                Some([]) => fail(next, BridgeError::EmptyResult(EmptyReason::NoPackages)),
                Some(_) => (next, Effect::Render),
            }
        }
        Step::Resource => match next.package_id.clone() {
            None => {
                next.step = Step::Package;
                enter(next, disc)
            }
            Some(pkg) if disc.resources(lang, &pkg).is_none() => (next, Effect::Load(Need::Resources(pkg))),
            Some(_) => (next, Effect::Render),
        },
        Step::Rows => {
            let Some(sel) = next.resource.clone() else {
                next.step = Step::Resource;
                return enter(next, disc);
            };
            match disc.rows(&sel.url) {
                None => (next, Effect::Load(Need::Rows(sel))),
                Some(n) if n.rows.is_empty() => fail(next, BridgeError::EmptyResult(EmptyReason::NoRows)),
                Some(_) => (next, Effect::Render),
            }
        }
        _ => (next, Effect::Render),
    }
}

fn on_input(mut next: WizardState, input: UserInput, disc: &Discovery, policy: &WizardPolicy) -> (WizardState, Effect) {
    let lang = next.language;
    match (next.step, input) {
        (Step::Language | Step::Done, UserInput::Back) => (next, Effect::Render),
        (step, UserInput::Back) => {
            let target = match step {
                Step::Group => Step::Language,
                Step::Package => Step::Group,
                Step::Resource => Step::Package,
                Step::Rows => Step::Resource,
                Step::Fields => Step::Rows,
                _ if next.resource.as_ref().is_some_and(|r| r.format == ResourceFormat::Wfs) => Step::Resource,
                _ => Step::Fields,
            };
            next.rewind(target);
            enter(next, disc)
        }
        (Step::Language, UserInput::Language(l)) => {
            next.language = l;
            next.step = Step::Group;
            enter(next, disc)
        }
        (Step::Group, UserInput::Group(id)) => {
            if let Some(groups) = disc.groups(lang) {
                if !groups.iter().any(|g| g.id == id || g.name == id) {
                    return invalid(next, format!("unknown group {id}"));
                }
            }
            next.rewind(Step::Group);
            next.group_id = Some(id);
            next.step = Step::Package;
            enter(next, disc)
        }
        (Step::Package, UserInput::Package(id)) => {
            let group = next.group_id.clone().unwrap_or_default();
            let known = disc.packages(lang, &group).is_some_and(|ps| ps.iter().any(|p| p.id == id || p.name == id));
            if !known {
                return invalid(next, format!("unknown package {id}"));
            }
            next.rewind(Step::Package);
            next.package_id = Some(id);
            next.step = Step::Resource;
            enter(next, disc)
        }
        (Step::Resource, UserInput::Resource(value)) => on_resource(next, &value, disc, policy),
        (Step::Rows, UserInput::Row(token)) => {
            let Some(sel) = next.resource.as_ref() else { return invalid(next, "no resource selected") };
            let len = disc.rows(&sel.url).map_or(0, |n| n.rows.len());
            match parse_row_token(&token) {
                Some(idx) if idx < len => {
                    next.rewind(Step::Rows);
                    next.row = Some(idx);
                    next.step = Step::Fields;
                    (next, Effect::Render)
                }
                _ => invalid(next, format!("unknown row {token}")),
            }
        }
        (Step::Fields, UserInput::Fields(tokens)) => on_fields(next, &tokens, disc, policy),
        (Step::Confirm, UserInput::Confirm) => match build_binding(&next, disc, policy) {
            Ok(binding) => {
                next.step = Step::Done;
                (next, Effect::Finish(binding))
            }
            Err(e) => fail(next, e),
        },
        (step, other) => invalid(next, format!("{other:?} is not an answer to {step:?}")),
    }
}

fn on_resource(mut next: WizardState, value: &str, disc: &Discovery, policy: &WizardPolicy) -> (WizardState, Effect) {
    if value.starts_with(UNAVAILABLE_PREFIX) {
        return (next, Effect::Render);
    }
    let package = next.package_id.clone().unwrap_or_default();
    let Some(resource) = disc.resources(next.language, &package).and_then(|rs| rs.iter().find(|r| r.id == value)) else {
        return invalid(next, format!("unknown resource {value}"));
    };
    let Some(format) = resource.format().filter(|_| resource.selectable()) else {
        return (next, Effect::Render);
    };
    let url = match civis_hub::resource_url(resource, next.language) {
        Ok(u) => u,
        Err(e) => return fail(next, e),
    };
    next.rewind(Step::Resource);
    let sel = SelectedResource { resource: resource.clone(), format, url };
    next.resource = Some(sel.clone());
    if format == ResourceFormat::Wfs {
        return match disc.rows(&sel.url) {
            Some(_) => wfs_ready(next, disc, policy),
            None => (next, Effect::Load(Need::Rows(sel))),
        };
    }
    next.step = Step::Rows;
    enter(next, disc)
}

/// Apply the fetch cap, then the entity ceiling, to a loaded WFS layer.
fn wfs_ready(mut next: WizardState, disc: &Discovery, policy: &WizardPolicy) -> (WizardState, Effect) {
    let Some(sel) = next.resource.clone() else { return enter(next, disc) };
    let count = disc.rows(&sel.url).map_or(0, |n| n.rows.len()).min(policy.wfs_fetch_cap);
    if count == 0 {
        next.rewind(Step::Resource);
        return fail(next, BridgeError::EmptyResult(EmptyReason::NoFeatures));
    }
    if count > policy.max_entities {
        next.rewind(Step::Resource);
        return fail(next, BridgeError::SelectionLimit { count, max: policy.max_entities });
    }
    next.step = Step::Confirm;
    (next, Effect::Render)
}

fn on_fields(mut next: WizardState, tokens: &[String], disc: &Discovery, policy: &WizardPolicy) -> (WizardState, Effect) {
    let mut selectors: Vec<FieldSelector> = Vec::with_capacity(tokens.len());
    for t in tokens {
        match t.parse::<FieldSelector>() {
            Ok(s) if !selectors.contains(&s) => selectors.push(s),
            Ok(_) => {}
            Err(e) => return fail(next, e),
        }
    }
    if selectors.is_empty() {
        return invalid(next, "select at least one value");
    }
    // one row per binding outside WFS
    let count = selectors.len();
    if count > policy.max_entities {
        return fail(next, BridgeError::SelectionLimit { count, max: policy.max_entities });
    }
    let (Some(sel), Some(idx)) = (next.resource.as_ref(), next.row) else {
        return invalid(next, "no row selected");
    };
    let Some(data) = disc.rows(&sel.url) else { return invalid(next, "rows not loaded") };
    let Some(row) = data.rows.get(idx) else { return invalid(next, format!("unknown row {idx}")) };
    let offered: Vec<FieldSelector> =
        field_candidates(sel.format, row, data.columns.as_deref()).into_iter().map(|c| c.selector).collect();
    if let Some(bad) = selectors.iter().find(|s| !offered.contains(s)) {
        return invalid(next, format!("{bad} is not offered for this row"));
    }
    next.fields = selectors;
    next.step = Step::Confirm;
    (next, Effect::Render)
}

/// `row_<idx>` to an index.
pub fn parse_row_token(token: &str) -> Option<usize> { token.strip_prefix("row_")?.parse().ok() }

/// Binding for the current selection. `created_ts` is left at zero.
pub fn build_binding(state: &WizardState, disc: &Discovery, policy: &WizardPolicy) -> Result<ResourceBinding, BridgeError> {
    let missing = |what: &str| BridgeError::Validation(format!("{what} not selected"));
    let group_id = state.group_id.clone().ok_or_else(|| missing("group"))?;
    let package_id = state.package_id.clone().ok_or_else(|| missing("package"))?;
    let sel = state.resource.clone().ok_or_else(|| missing("resource"))?;
    let data = disc.rows(&sel.url).ok_or_else(|| missing("rows"))?;
    let (rows, snapshot, fields) = if sel.format == ResourceFormat::Wfs {
        let n = data.rows.len().min(policy.wfs_fetch_cap);
        (RowSelection::All, data.rows[..n].to_vec(), Vec::new())
    } else {
        let idx = state.row.ok_or_else(|| missing("row"))?;
        if state.fields.is_empty() {
            return Err(missing("fields"));
        }
        (RowSelection::single(idx), data.rows.clone(), state.fields.clone())
    };
    Ok(ResourceBinding {
        title: clean_resource_name(&sel.resource.name),
        language: state.language,
        group_id,
        package_id,
        format: sel.format,
        url: sel.url,
        resource: sel.resource,
        rows,
        fields,
        columns: data.columns.clone(),
        snapshot,
        created_ts: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use civis_core::Row;
    use serde_json::json;

    fn resource(id: &str, format: &str) -> CatalogResource {
        CatalogResource { id: id.into(), name: format!("{id} (Formato {format})"), format_tag: format.into(), url: format!("http://d/{id}") }
    }

    fn at_resources() -> (WizardState, Discovery) {
        let mut disc = Discovery::default();
        disc.for_language(Language::En);
        disc.store_groups(vec![CatalogGroup::from_api(&json!({"name": "weather"})).unwrap()]);
        disc.store_packages("weather", vec![CatalogPackage::from_api(&json!({"id": "p1", "title": "Meteo"}), "weather").unwrap()]);
        disc.store_resources("p1", vec![resource("r1", "JSON"), resource("r2", "PDF"), resource("r3", "WFS")]);
        let state = WizardState {
            step: Step::Resource,
            group_id: Some("weather".into()),
            package_id: Some("p1".into()),
            ..WizardState::default()
        };
        (state, disc)
    }

    fn input(s: &WizardState, i: UserInput, d: &Discovery) -> (WizardState, Effect) {
        transition(s, Event::Input(i), d, &WizardPolicy::default())
    }

    #[test]
    fn language_then_groups_load() {
        let s = WizardState::default();
        let (s, e) = input(&s, UserInput::Language(Language::De), &Discovery::default());
        assert_eq!(s.step, Step::Group);
        assert_eq!(s.language, Language::De);
        assert_eq!(e, Effect::Load(Need::Groups));
    }

    #[test]
    fn show_with_memoized_data_only_renders() {
        let (s, d) = at_resources();
        let (s2, e) = transition(&s, Event::Show, &d, &WizardPolicy::default());
        assert_eq!(e, Effect::Render);
        assert_eq!(s2, s);
    }

    #[test]
    fn unavailable_resources_keep_the_step_without_error() {
        let (s, d) = at_resources();
        for v in ["unavailable:r2", "r2"] {
            let (s2, e) = input(&s, UserInput::Resource(v.into()), &d);
            assert_eq!(e, Effect::Render);
            assert_eq!(s2.step, Step::Resource);
            assert!(s2.error.is_none());
        }
    }

    #[test]
    fn json_resource_goes_to_rows_and_loads() {
        let (s, d) = at_resources();
        let (s2, e) = input(&s, UserInput::Resource("r1".into()), &d);
        assert_eq!(s2.step, Step::Rows);
        let sel = s2.resource.clone().unwrap();
        assert_eq!(sel.url, "http://d/r1?lang=en");
        assert_eq!(e, Effect::Load(Need::Rows(sel)));
    }

    #[test]
    fn empty_rows_and_failures_stay_on_rows() {
        let (s, mut d) = at_resources();
        let (s, _) = input(&s, UserInput::Resource("r1".into()), &d);
        let sel = s.resource.clone().unwrap();
        let (failed, e) = transition(&s, Event::Failed(Need::Rows(sel.clone()), BridgeError::FormatParse("x".into())), &d, &WizardPolicy::default());
        assert_eq!(e, Effect::Render);
        assert_eq!(failed.step, Step::Rows);
        assert_eq!(failed.error.as_ref().map(BridgeError::reason), Some("invalid_format"));

        d.store_rows(&sel.url, Normalized::default());
        let (empty, _) = transition(&s, Event::Loaded(Need::Rows(sel)), &d, &WizardPolicy::default());
        assert_eq!(empty.step, Step::Rows);
        assert_eq!(empty.error.as_ref().map(BridgeError::reason), Some("no_rows"));
    }

    #[test]
    fn wfs_cap_then_ceiling() {
        let (s, mut d) = at_resources();
        let (s, e) = input(&s, UserInput::Resource("r3".into()), &d);
        let Effect::Load(Need::Rows(sel)) = e else { panic!("expected a load, got {e:?}") };
        assert_eq!(s.step, Step::Resource);

        let features = |n: usize| Normalized { columns: None, rows: (0..n).map(|_| Row::default()).collect() };
        let policy = WizardPolicy { max_entities: 100, wfs_fetch_cap: 500 };

        d.store_rows(&sel.url, features(0));
        let (z, _) = transition(&s, Event::Loaded(Need::Rows(sel.clone())), &d, &policy);
        assert_eq!(z.error.as_ref().map(BridgeError::reason), Some("no_features"));
        assert_eq!(z.step, Step::Resource);

        d.store_rows(&sel.url, features(700));
        let (big, _) = transition(&s, Event::Loaded(Need::Rows(sel.clone())), &d, &policy);
        assert_eq!(big.error, Some(BridgeError::SelectionLimit { count: 500, max: 100 }));

        d.store_rows(&sel.url, features(3));
        let (ok, _) = transition(&s, Event::Loaded(Need::Rows(sel)), &d, &policy);
        assert_eq!(ok.step, Step::Confirm);
        let b = build_binding(&ok, &d, &policy).unwrap();
        assert_eq!(b.rows, RowSelection::All);
        assert_eq!(b.snapshot.len(), 3);
        assert_eq!(b.title, "r3");
    }

    #[test]
    fn back_clears_downstream() {
        let (s, d) = at_resources();
        let (s, _) = input(&s, UserInput::Resource("r1".into()), &d);
        assert!(s.resource.is_some());
        let (s, e) = input(&s, UserInput::Back, &d);
        assert_eq!(s.step, Step::Resource);
        assert!(s.resource.is_none());
        assert_eq!(e, Effect::Render);
        let (s, _) = input(&s, UserInput::Back, &d);
        assert_eq!(s.step, Step::Package);
        assert!(s.package_id.is_none());
        assert_eq!(s.group_id.as_deref(), Some("weather"));
    }

    #[test]
    fn catalog_failures_stay_on_the_requesting_step() {
        let (s, mut d) = at_resources();
        let (at_pkg, _) = input(&s, UserInput::Back, &d);
        assert_eq!(at_pkg.step, Step::Package);

        let err = || BridgeError::Connectivity("timed out".into());
        let (f, e) = transition(&at_pkg, Event::Failed(Need::Packages("weather".into()), err()), &d, &WizardPolicy::default());
        assert_eq!(e, Effect::Render);
        assert_eq!(f.step, Step::Package);
        assert_eq!(f.group_id.as_deref(), Some("weather"));
        assert_eq!(f.error.as_ref().map(BridgeError::reason), Some("cannot_connect"));

        let (f, _) = transition(&s, Event::Failed(Need::Resources("p1".into()), err()), &d, &WizardPolicy::default());
        assert_eq!(f.step, Step::Resource);
        assert_eq!(f.package_id.as_deref(), Some("p1"));

        d.store_packages("weather", Vec::new());
        let (empty, e) = transition(&at_pkg, Event::Show, &d, &WizardPolicy::default());
        assert_eq!(e, Effect::Render);
        assert_eq!(empty.step, Step::Package);
        assert_eq!(empty.error.as_ref().map(BridgeError::reason), Some("no_packages"));
        let (back, _) = input(&empty, UserInput::Back, &d);
        assert_eq!(back.step, Step::Group);
        assert!(back.error.is_none());
    }

    #[test]
    fn mismatched_input_is_invalid() {
        let (s, d) = at_resources();
        let (s2, _) = input(&s, UserInput::Confirm, &d);
        assert_eq!(s2.step, Step::Resource);
        assert_eq!(s2.error.as_ref().map(BridgeError::reason), Some("invalid_input"));
    }

    #[test]
    fn row_tokens() {
        assert_eq!(parse_row_token("row_12"), Some(12));
        assert_eq!(parse_row_token("row_"), None);
        assert_eq!(parse_row_token("12"), None);
    }
}
