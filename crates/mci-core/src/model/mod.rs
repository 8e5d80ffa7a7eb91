//! Fleet records, request templates and response views

mod fleet;
mod remote;
mod request;
mod view;

pub use fleet::{ConnectionConfig, Mci, Namespace, SshKey, SubGroup, Vm};
pub use remote::{
    BastionNode, CommandOutput, CommandRequest, CommandResult, FileTransferRequest, TargetFilter,
    VnetBastions,
};
pub use request::{DynamicVmTemplate, MciDynamicRequest, MciRequest, VmTemplate};
pub use view::{
    ActionReport, DeleteOption, DeleteReport, MciAccessInfo, MciInfo, MciStatusInfo, MciView,
    SubGroupAccessInfo, VmAccessInfo, VmActionResult, VmDeleteResult, VmFilter, VmStatusInfo,
};
