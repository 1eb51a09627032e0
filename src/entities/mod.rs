pub mod admin;
pub mod admin_permission;
pub mod app_user;
pub mod city;
pub mod country;
pub mod department;
pub mod department_employee;
pub mod employee;
pub mod export_run;
pub mod permission;
pub mod session;
pub mod state;
