pub(crate) mod analytic_schema;
pub(crate) mod forum_schema;
