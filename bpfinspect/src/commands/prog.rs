use crate::error::InspectError;
use crate::inspect::ProgramService;
use crate::output::Formatter;
use crate::selector::{parse_prog_selector, ProgSelector};

/// `prog show [id N | tag T | name N | pinned P]`
pub fn show(
    service: &dyn ProgramService,
    formatter: &dyn Formatter,
    args: &[String],
) -> Result<String, InspectError> {
    let programs = match parse_prog_selector(args)? {
        None => service.list()?,
        Some(ProgSelector::Id(id)) => vec![service.get_by_id(id)?],
        Some(ProgSelector::Tag(tag)) => service.get_by_tag(&tag)?,
        Some(ProgSelector::Name(name)) => service.get_by_name(&name)?,
        Some(ProgSelector::Pinned(path)) => vec![service.get_by_pinned_path(&path)?],
    };
    Ok(formatter.programs(&programs))
}
