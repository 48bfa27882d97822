pub(crate) mod run;
pub(crate) mod show;
pub(crate) mod summary;
