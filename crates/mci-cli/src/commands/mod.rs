//! CLI command implementations

mod action;
mod config;
mod daemon;
mod mci;
mod registry;
mod remote;

pub use action::{control_command, delete_command, refine_command, DeleteTarget};
pub use config::{config_get, config_init, config_set, config_show};
pub use daemon::{ping_command, start_command, status_command, stop_command};
pub use mci::{
    add_sub_group_command, create_command, get_command, list_command, read_request_file,
    scale_out_command, vm_get_command, vm_list_command,
};
pub use registry::{
    connection_get, connection_list, connection_register, key_delete, key_list, key_register,
    namespace_create, namespace_delete, namespace_get, namespace_list,
};
pub use remote::{
    bastion_get, bastion_list, bastion_remove, bastion_set, cmd_command, copy_command, Targets,
};
