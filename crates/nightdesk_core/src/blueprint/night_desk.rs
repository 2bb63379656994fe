use super::{Blueprint, DatabaseBlueprint, PageBlueprint, RelationBlueprint};
use crate::model::schema::{PropertySpec, RollupFunction, SchemaError};

pub const INBOX: &str = "Night Desk — Inbox";
pub const TASKS: &str = "Night Desk — Tasks";
pub const PROJECTS: &str = "Night Desk — Projects";
pub const NOTES: &str = "Night Desk — Notes";
pub const ASSETS: &str = "Night Desk — Assets";
pub const PEOPLE: &str = "Night Desk — People";

pub const HOME_PAGE: &str = "Night Desk — Home — Today";
pub const WRITING_SCENE_PAGE: &str = "Night Desk — Writing Scene";
pub const EDITING_SCENE_PAGE: &str = "Night Desk — Editing Scene";
pub const ADMIN_SCENE_PAGE: &str = "Night Desk — Admin Scene";
pub const REVIEW_PAGE: &str = "Night Desk — Review";
pub const TEMPLATE_ROOT_PAGE: &str = "Night Desk — Template Root";

/// Date property driving the daily resurfacing queue.
pub const RESURFACE_PROPERTY: &str = "Resurface On";

const SCENES: [&str; 4] = ["Writing", "Editing", "Admin", "Deep Work"];

/// Night Desk workspace: six related databases and six scaffold pages.
///
/// # Errors
/// Returns `SchemaError` when the literal set fails its own consistency
/// check.
pub fn night_desk() -> Result<Blueprint, SchemaError> {
    let blueprint = Blueprint {
        databases: vec![
            inbox()?,
            tasks()?,
            projects()?,
            notes()?,
            assets()?,
            people()?,
        ],
        pages: [
            HOME_PAGE,
            WRITING_SCENE_PAGE,
            EDITING_SCENE_PAGE,
            ADMIN_SCENE_PAGE,
            REVIEW_PAGE,
            TEMPLATE_ROOT_PAGE,
        ]
        .into_iter()
        .map(|name| PageBlueprint {
            name: name.to_string(),
        })
        .collect(),
        relations: vec![
            RelationBlueprint::dual(TASKS, "Project", PROJECTS, "Tasks"),
            RelationBlueprint::dual(NOTES, "Project", PROJECTS, "Notes"),
            RelationBlueprint::dual(ASSETS, "Project", PROJECTS, "Assets"),
            RelationBlueprint::dual(PEOPLE, "Projects", PROJECTS, "People"),
            RelationBlueprint::single(INBOX, "Project", PROJECTS),
            RelationBlueprint::single(INBOX, "People", PEOPLE),
            RelationBlueprint::single(NOTES, "Assets", ASSETS),
        ],
    };
    blueprint.validate()?;
    Ok(blueprint)
}

fn inbox() -> Result<DatabaseBlueprint, SchemaError> {
    Ok(DatabaseBlueprint::new(INBOX)
        .property("Name", PropertySpec::Title)
        .property(
            "Type",
            PropertySpec::select(["Idea", "Task", "Note", "Asset", "Link"])?,
        )
        .property("File", PropertySpec::Files)
        .property("URL", PropertySpec::Url)
        .property("Next Tiny Step", PropertySpec::RichText)
        .property(RESURFACE_PROPERTY, PropertySpec::Date)
        .property("Pinned", PropertySpec::Checkbox)
        .property("Created", PropertySpec::CreatedTime))
}

fn tasks() -> Result<DatabaseBlueprint, SchemaError> {
    Ok(DatabaseBlueprint::new(TASKS)
        .property("Name", PropertySpec::Title)
        .property(
            "Status",
            PropertySpec::select(["Now", "Next", "Scheduled", "Waiting", "Done"])?,
        )
        .property("Priority", PropertySpec::select(["Low", "Med", "High"])?)
        .property("Effort (hrs)", PropertySpec::Number)
        .property("Due", PropertySpec::Date)
        .property("Scene", PropertySpec::select(SCENES)?)
        .property("If", PropertySpec::RichText)
        .property("Then", PropertySpec::RichText)
        .property("At", PropertySpec::RichText)
        .property("Timebox (min)", PropertySpec::Number)
        .property(RESURFACE_PROPERTY, PropertySpec::Date)
        .property("Pinned", PropertySpec::Checkbox)
        .property("Completed On", PropertySpec::Date)
        .derived(
            "Implementation Intent",
            PropertySpec::formula(
                r#"if(empty(prop("If")), "", "If " + prop("If") + ", then " + prop("Then") + " at " + prop("At"))"#,
            )?,
        ))
}

fn projects() -> Result<DatabaseBlueprint, SchemaError> {
    Ok(DatabaseBlueprint::new(PROJECTS)
        .property("Name", PropertySpec::Title)
        .property("Goal", PropertySpec::RichText)
        .property(
            "Status",
            PropertySpec::select(["Active", "On Hold", "Someday", "Done"])?,
        )
        .property("Due", PropertySpec::Date)
        .property("Scene Default", PropertySpec::select(SCENES)?)
        .property("Next Review", PropertySpec::Date)
        .property("Pinned", PropertySpec::Checkbox)
        .derived(
            "Progress %",
            PropertySpec::rollup("Tasks", "Completed On", RollupFunction::PercentNotEmpty)?,
        ))
}

fn notes() -> Result<DatabaseBlueprint, SchemaError> {
    Ok(DatabaseBlueprint::new(NOTES)
        .property("Name", PropertySpec::Title)
        .property(
            "Type",
            PropertySpec::select(["Idea", "Reference", "Draft"])?,
        )
        .property("Source URL", PropertySpec::Url)
        .property("Excerpt", PropertySpec::RichText)
        .property(RESURFACE_PROPERTY, PropertySpec::Date)
        .property("Tags", PropertySpec::RichText)
        .property("Created", PropertySpec::CreatedTime))
}

fn assets() -> Result<DatabaseBlueprint, SchemaError> {
    Ok(DatabaseBlueprint::new(ASSETS)
        .property("Name", PropertySpec::Title)
        .property("Files", PropertySpec::Files)
        .property(
            "Type",
            PropertySpec::select(["Image", "Video", "Audio", "Doc", "Thumb", "B-roll"])?,
        )
        .property("Source URL", PropertySpec::Url)
        .property("Pinned", PropertySpec::Checkbox)
        .property("Added", PropertySpec::CreatedTime)
        .property("Tags", PropertySpec::RichText))
}

fn people() -> Result<DatabaseBlueprint, SchemaError> {
    Ok(DatabaseBlueprint::new(PEOPLE)
        .property("Name", PropertySpec::Title)
        .property(
            "Role",
            PropertySpec::select(["Collaborator", "Client", "Body-Double", "Friend"])?,
        )
        .property("Email", PropertySpec::Email)
        .property("Notes", PropertySpec::RichText))
}
