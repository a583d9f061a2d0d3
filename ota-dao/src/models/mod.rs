pub mod app;
pub mod package;
pub mod user;

pub use app::{App, AppUpdate, Collaborator, Deployment, NewApp, NewDeployment, Permission};
pub use package::{Package, PackageUpdate};
pub use user::{AccessKey, NewUser, User, UserUpdate};
