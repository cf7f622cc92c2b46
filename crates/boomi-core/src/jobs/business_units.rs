// crates/boomi-core/src/jobs/business_units.rs
use anyhow::Result;
use async_trait::async_trait;
use boomi_parser::{Row, Value};

use super::{workday_report, Job};
use crate::cache::CollisionPolicy;
use crate::context::{JobContext, SoftErrorKind};
use crate::report::RunReport;
use crate::runner::{build_caches, Branch, CachePhase, Pipeline};
use crate::sink::{FileSink, Sink};
use crate::source::{materialize, HttpReportSource, MemorySource, Source};
use crate::transform::{Distinct, FnStep, Remap, StepOutcome, StepScope, TransformChain};

pub const COST_CENTERS_REPORT: &str = "intg__Business_Units_Feed?Organizations%21WID=4f414049b78141f3981464563b36ba46!7f8db47cd30d4cdfa5670e37ee0df3ad&Include_Subordinate_Organizations=1&format=csv&bom=true";
pub const SUPERVISORY_ORGS_REPORT: &str = "intg__Supervisory_Orgs_Feed?format=csv&bom=true";
pub const COST_CENTER_CACHE: &str = "cost_centers";

pub const COST_CENTER_FILE: &str = "centerstone/downloads/CostCenterLevel2.txt";
pub const PRODUCT_LINE_FILE: &str = "centerstone/downloads/ProductLineLevel1.txt";
pub const TEAM_FILE: &str = "centerstone/downloads/TeamLevel3.txt";

/// One line per key in each file; a later row with the same key replaces
/// the earlier one.
pub const COST_CENTER_KEY: [&str; 1] = ["Cost_Center"];
pub const PRODUCT_LINE_KEY: [&str; 1] = ["Product_Line"];
pub const TEAM_KEY: [&str; 3] = ["Cost_Center", "Product_Line", "Team"];

const COST_CENTER_FIELDS: [&str; 6] = [
    "Cost_Center",
    "Cost_Center_ID",
    "Cost_Center_Hierarchy",
    "Manager",
    "CCH_Manager",
    "HRBP",
];

pub fn cost_center_remap() -> Remap {
    Remap::new("cost_center_remap")
        .field("Product_Line", "Cost_Center_Hierarchy")
        .fields(&["Cost_Center"])
        .field("Name", "Cost_Center")
        .field("Manager_Name", "Manager")
        .constant("Type (Cost Center)", "Cost Center")
        .field("Cost_Center_Number", "Cost_Center_ID")
}

pub fn cost_center_cache(source: Box<dyn Source>) -> CachePhase {
    CachePhase::new(COST_CENTER_CACHE, source, CollisionPolicy::Overwrite, |row| {
        Some(row.text("Cost_Center"))
    })
}

/// Supervisory org merged with the details of its cost centre.
fn join_cost_centers(row: &Row, scope: &StepScope<'_>) -> StepOutcome {
    let Some(details) = scope
        .caches
        .lookup(COST_CENTER_CACHE, &row.text("Cost_Center"))
        .first()
    else {
        return scope.reject(
            "join_cost_centers",
            SoftErrorKind::Lookup,
            format!("unknown cost center {:?}", row.text("Cost_Center")),
            row,
        );
    };
    let detail = |field: &str| details.get(field).cloned().unwrap_or(Value::Null);
    StepOutcome::Replace(
        Row::new()
            .with("Team", row.get("Organization").cloned().unwrap_or_default())
            .with("Team_Manager", row.get("manager").cloned().unwrap_or_default())
            .with("Cost_Center", detail("Cost_Center"))
            .with("Cost_Center_ID", detail("Cost_Center_ID"))
            .with("Coster_Center_Manager", detail("Manager"))
            .with("Product_Line", detail("Cost_Center_Hierarchy"))
            .with("Product_Line_Manager", detail("CCH_Manager"))
            .with("HRBP", detail("HRBP")),
    )
}

pub fn chain() -> TransformChain {
    TransformChain::new()
        .step(FnStep::new("join_cost_centers", join_cost_centers))
        .step(
            Remap::new("business_unit_remap")
                .fields(&["Cost_Center"])
                .field("Cost_Center_Number", "Cost_Center_ID")
                .field("Cost_Center_Manager", "Coster_Center_Manager")
                .fields(&["Product_Line", "Product_Line_Manager", "Team", "Team_Manager"]),
        )
}

pub fn product_line_remap() -> Remap {
    Remap::new("product_line_remap")
        .fields(&["Product_Line"])
        .field("Name", "Product_Line")
        .field("Manager_Name", "Product_Line_Manager")
        .constant("Type", "Product Line")
}

pub fn team_remap() -> Remap {
    Remap::new("team_remap")
        .fields(&["Cost_Center", "Product_Line", "Team"])
        .field("Name", "Team")
        .field("Manager_Name", "Team_Manager")
        .constant("Type", "Team")
}

pub struct BusinessUnitSinks {
    pub cost_centers: Box<dyn Sink>,
    pub product_lines: Box<dyn Sink>,
    pub teams: Box<dyn Sink>,
}

impl BusinessUnitSinks {
    /// The three Centerstone files on the SFTP store.
    pub fn files(ctx: &JobContext) -> Self {
        let file = |path: &str, key: &[&str]| {
            ctx.file_sink(FileSink::new(ctx.sftp().clone(), ctx.options.file(path)).keyed_by(key))
        };
        Self {
            cost_centers: file(COST_CENTER_FILE, &COST_CENTER_KEY),
            product_lines: file(PRODUCT_LINE_FILE, &PRODUCT_LINE_KEY),
            teams: file(TEAM_FILE, &TEAM_KEY),
        }
    }
}

pub async fn run_with(
    ctx: &JobContext,
    mut cost_centers: Box<dyn Source>,
    orgs: Box<dyn Source>,
    sinks: BusinessUnitSinks,
) -> Result<RunReport> {
    let centers = materialize(cost_centers.as_mut(), ctx).await?;
    let source_name = cost_centers.name();

    let built = build_caches(
        ctx,
        vec![cost_center_cache(Box::new(MemorySource::new(
            source_name.clone(),
            centers.clone(),
        )))],
    )
    .await?;

    let cost_center_file =
        Pipeline::new("cost_centers", Box::new(MemorySource::new(source_name, centers)))
            .step(cost_center_remap())
            .identity(&["Cost_Center"])
            .sinks(vec![sinks.cost_centers]);
    let centers_outcome = cost_center_file.run(ctx, &built.caches).await?;

    let units = Pipeline::new("business_units", orgs)
        .chain(chain())
        .identity(&["Organization"])
        .limit(ctx.options.limit)
        .branch(
            Branch::new("product_lines")
                .step(product_line_remap())
                .step(Distinct::on(&["Product_Line"]))
                .sink(sinks.product_lines),
        )
        .branch(Branch::new("teams").step(team_remap()).sink(sinks.teams));
    let units_outcome = units.run(ctx, &built.caches).await?;

    let mut report = RunReport::new("business_units", ctx);
    report.extend(built.phases);
    report.extend(centers_outcome.phases);
    report.extend(units_outcome.phases);
    report.anomalies = built.anomalies;
    Ok(report.finish(ctx))
}

/// Workday cost centres and supervisory orgs as the Centerstone hierarchy.
pub struct BusinessUnits;

#[async_trait]
impl Job for BusinessUnits {
    fn code_identifier(&self) -> &'static str {
        "business_units"
    }

    fn description(&self) -> &'static str {
        "Workday cost centers, product lines and teams for Centerstone"
    }

    async fn run(&self, ctx: &JobContext) -> Result<RunReport> {
        let cost_centers =
            HttpReportSource::new(ctx.workday().clone(), workday_report(ctx, COST_CENTERS_REPORT))
                .requiring(&COST_CENTER_FIELDS);
        let orgs = HttpReportSource::new(
            ctx.workday().clone(),
            workday_report(ctx, SUPERVISORY_ORGS_REPORT),
        )
        .requiring(&["Organization", "manager", "Cost_Center"]);
        let sinks = BusinessUnitSinks::files(ctx);
        run_with(ctx, Box::new(cost_centers), Box::new(orgs), sinks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheBuilder;
    use crate::options::JobOptions;
    use crate::transform::tests::Harness;
    use chrono::NaiveDateTime;

    fn harness() -> Harness {
        let mut harness = Harness::new();
        harness.identity = vec!["Organization".to_string()];
        let mut builder = CacheBuilder::new(COST_CENTER_CACHE, CollisionPolicy::Overwrite);
        builder.insert(
            "Engineering".to_string(),
            Row::new()
                .with("Cost_Center", "Engineering")
                .with("Cost_Center_ID", "1010")
                .with("Cost_Center_Hierarchy", "Firefox")
                .with("Manager", "Ada")
                .with("CCH_Manager", "Grace")
                .with("HRBP", "Lin"),
        );
        harness.caches.insert(builder.finish().cache);
        harness
    }

    fn org(name: &str, cost_center: &str) -> Row {
        Row::new()
            .with("Organization", name)
            .with("manager", "Ken")
            .with("Cost_Center", cost_center)
    }

    #[test]
    fn org_is_joined_to_its_cost_center() {
        let harness = harness();
        let out = chain().run(org("Graphics", "Engineering"), &harness.scope());
        assert_eq!(
            out[0].fields().collect::<Vec<_>>(),
            vec![
                "Cost_Center",
                "Cost_Center_Number",
                "Cost_Center_Manager",
                "Product_Line",
                "Product_Line_Manager",
                "Team",
                "Team_Manager",
            ]
        );
        assert_eq!(out[0].text("Cost_Center_Manager"), "Ada");
        assert_eq!(out[0].text("Product_Line"), "Firefox");
        assert_eq!(out[0].text("Team_Manager"), "Ken");
    }

    #[test]
    fn unknown_cost_center_is_a_lookup_error() {
        let harness = harness();
        assert!(chain().run(org("Ghosts", "Nowhere"), &harness.scope()).is_empty());
        let errors = harness.errors.snapshot();
        assert_eq!(errors[0].kind, SoftErrorKind::Lookup);
        assert_eq!(errors[0].identity.as_deref(), Some("Ghosts"));
    }

    #[test]
    fn product_lines_are_written_once() {
        let harness = harness();
        let mut branch = TransformChain::new()
            .step(product_line_remap())
            .step(Distinct::on(&["Product_Line"]));
        let unit = chain().run(org("Graphics", "Engineering"), &harness.scope()).remove(0);
        assert_eq!(branch.run(unit.clone(), &harness.scope()).len(), 1);
        assert!(branch.run(unit, &harness.scope()).is_empty());
    }

    #[test]
    fn cost_center_file_layout() {
        let center = Row::new()
            .with("Cost_Center", "Engineering")
            .with("Cost_Center_ID", "1010")
            .with("Cost_Center_Hierarchy", "Firefox")
            .with("Manager", "Ada");
        let out = cost_center_remap().map(&center);
        assert_eq!(out.text("Name"), "Engineering");
        assert_eq!(out.text("Type (Cost Center)"), "Cost Center");
        assert_eq!(out.text("Cost_Center_Number"), "1010");
    }

    #[test]
    fn team_file_keeps_same_named_teams_under_different_cost_centers() {
        let dir = tempfile::tempdir().unwrap();
        let now =
            NaiveDateTime::parse_from_str("2018-05-15 09:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let ctx = JobContext::new(JobOptions::new(now).with_file_root(dir.path())).unwrap();
        let center = |name: &str, id: &str, line: &str| {
            Row::new()
                .with("Cost_Center", name)
                .with("Cost_Center_ID", id)
                .with("Cost_Center_Hierarchy", line)
                .with("Manager", "Ada")
                .with("CCH_Manager", "Grace")
                .with("HRBP", "Lin")
        };
        let centers = MemorySource::new(
            "cost_centers",
            vec![
                center("Engineering", "1010", "Firefox"),
                center("Research", "2020", "Firefox"),
            ],
        );
        let orgs = MemorySource::new(
            "orgs",
            vec![
                org("Graphics", "Engineering"),
                org("Graphics", "Research"),
                org("Graphics", "Engineering"),
            ],
        );

        let report = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(run_with(
                &ctx,
                Box::new(centers),
                Box::new(orgs),
                BusinessUnitSinks::files(&ctx),
            ))
            .unwrap();

        assert!(report.succeeded());
        let read = |path: &str| {
            std::fs::read_to_string(dir.path().join(ctx.options.file(path))).unwrap()
        };
        let teams = read(TEAM_FILE);
        assert_eq!(teams.lines().count(), 2);
        assert!(teams.lines().any(|line| line.starts_with("Engineering\tFirefox\tGraphics")));
        assert!(teams.lines().any(|line| line.starts_with("Research\tFirefox\tGraphics")));
        assert_eq!(read(PRODUCT_LINE_FILE).lines().count(), 1);
        assert_eq!(read(COST_CENTER_FILE).lines().count(), 2);
    }
}
