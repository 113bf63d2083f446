use course_engine::{course::Module, enrollment::EnrollmentState, progress::ProgressSnapshot};
use schemars::schema_for;

fn main() -> anyhow::Result<()> {
    let schemas = serde_json::json!({
        "Module": schema_for!(Module),
        "EnrollmentState": schema_for!(EnrollmentState),
        "ProgressSnapshot": schema_for!(ProgressSnapshot),
    });
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}
