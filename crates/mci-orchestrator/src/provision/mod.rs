//! MCI provisioning
//!
//! A create call validates every template up front, writes the MCI and its
//! `Creating` VM records, then fans out one pipeline task per VM. The call
//! returns once every task has finished or the operation deadline expired;
//! VMs without a result by then are reported as `Unknown`.

mod plan;
mod task;

pub(crate) use plan::{check_request_size, expand, resolve_template, VmPlan};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mci_core::error::{MciError, ValidationError};
use mci_core::model::{
    Mci, MciDynamicRequest, MciInfo, MciRequest, SubGroup, Vm, VmTemplate,
};
use mci_core::time::current_time_millis;
use mci_core::types::{MciId, NamespaceId, VmStatus};

use crate::state::OrchestratorState;

use task::TaskContext;

/// Message recorded on VMs whose task outlived the operation deadline
pub const DEADLINE_MESSAGE: &str = "no result before the operation deadline";

/// Creates MCIs and grows them
#[derive(Clone)]
pub struct Provisioner {
    state: OrchestratorState,
}

impl Provisioner {
    pub fn new(state: OrchestratorState) -> Self {
        Self { state }
    }

    /// Create an MCI from fully specified templates
    pub async fn create_mci(&self, ns: &str, req: MciRequest) -> Result<MciInfo, MciError> {
        let ns = NamespaceId::parse(ns)?;
        self.state.repo.require_namespace(&ns).await?;
        let mci_id = MciId::parse(&req.name)?;

        if req.vm.is_empty() {
            return Err(ValidationError::InvalidTemplate(
                "at least one VM template is required".to_string(),
            )
            .into());
        }
        if self.state.repo.get_mci(&ns, &mci_id).await?.is_some() {
            return Err(ValidationError::MciExists {
                ns: ns.to_string(),
                mci: mci_id.to_string(),
            }
            .into());
        }

        let mut resolved = Vec::with_capacity(req.vm.len());
        let mut seen = HashSet::new();
        for template in &req.vm {
            let r = resolve_template(&self.state, &ns, template).await?;
            if !seen.insert(r.sub_group_id.clone()) {
                return Err(ValidationError::SubGroupExists {
                    mci: mci_id.to_string(),
                    sub_group: r.sub_group_id.to_string(),
                }
                .into());
            }
            resolved.push(r);
        }
        let requested: u64 = resolved
            .iter()
            .map(|r| u64::from(r.template.sub_group_size))
            .sum();
        check_request_size(&self.state, requested)?;

        let mut mci = Mci {
            id: mci_id,
            name: req.name.clone(),
            description: req.description,
            placement_algo: req.placement_algo,
            target_vm_count: 0,
            install_agent: req.install_agent,
            agent_installed: false,
            label: req.label,
            sub_groups: Vec::with_capacity(resolved.len()),
            created_at: current_time_millis(),
        };

        let mut plans = Vec::new();
        for r in &resolved {
            let size = r.template.sub_group_size;
            let group = expand(r, &mci.id, 1, size, self.state.config.remote.ssh_port)?;
            mci.sub_groups.push(SubGroup {
                id: r.sub_group_id.clone(),
                template: r.template.clone(),
                vm_ids: group.iter().map(|p| p.vm.id.clone()).collect(),
            });
            mci.target_vm_count += size;
            plans.extend(group);
        }

        tracing::info!(
            "Creating MCI {}/{} with {} VM(s) in {} SubGroup(s)",
            ns,
            mci.id,
            plans.len(),
            mci.sub_groups.len()
        );
        self.record_plans(&ns, &mci, &plans).await?;
        let vms = self.run_plans(&ns, &mci, plans).await;
        self.finish(&ns, mci, vms).await
    }

    /// Create an MCI whose templates name `provider+region+spec`
    pub async fn create_mci_dynamic(
        &self,
        ns: &str,
        req: MciDynamicRequest,
    ) -> Result<MciInfo, MciError> {
        let mut templates = Vec::with_capacity(req.vm.len());
        for t in &req.vm {
            let (provider, region, spec) = t.spec_parts()?;
            let conn = match &t.connection_name {
                Some(name) => self.state.connections.require(name)?,
                None => self.state.connections.find(provider, region).ok_or_else(|| {
                    ValidationError::ConnectionNotFound(format!("{}+{}", provider, region))
                })?,
            };
            // Dynamic templates use the connection's shared network and key
            let shared = format!("{}-shared", conn.name);
            templates.push(VmTemplate {
                name: t.name.clone(),
                sub_group_size: t.sub_group_size,
                connection_name: conn.name.clone(),
                image_id: t.common_image.clone(),
                spec_id: spec.to_string(),
                vnet_id: shared.clone(),
                subnet_id: shared.clone(),
                security_group_ids: vec![shared.clone()],
                ssh_key_id: shared,
                vm_user_name: t.vm_user_name.clone(),
                root_disk_size: t.root_disk_size,
                description: t.description.clone(),
                label: t.label.clone(),
            });
        }

        self.create_mci(
            ns,
            MciRequest {
                name: req.name,
                description: req.description,
                placement_algo: String::new(),
                install_agent: req.install_agent,
                label: req.label,
                vm: templates,
            },
        )
        .await
    }

    /// Add a new SubGroup to an existing MCI
    pub async fn add_sub_group(
        &self,
        ns: &str,
        mci: &str,
        template: VmTemplate,
    ) -> Result<MciInfo, MciError> {
        let ns = NamespaceId::parse(ns)?;
        let mci_id = MciId::parse(mci)?;
        let mut mci = self.state.repo.require_mci(&ns, &mci_id).await?;

        let resolved = resolve_template(&self.state, &ns, &template).await?;
        if mci.sub_group(&resolved.sub_group_id).is_some() {
            return Err(ValidationError::SubGroupExists {
                mci: mci.id.to_string(),
                sub_group: resolved.sub_group_id.to_string(),
            }
            .into());
        }

        let size = check_request_size(&self.state, u64::from(resolved.template.sub_group_size))?;
        let target_vm_count = mci
            .target_vm_count
            .checked_add(size)
            .ok_or_else(|| ValidationError::InvalidReplicaCount(i64::from(size)))?;
        let plans = expand(&resolved, &mci.id, 1, size, self.state.config.remote.ssh_port)?;
        mci.sub_groups.push(SubGroup {
            id: resolved.sub_group_id.clone(),
            template: resolved.template.clone(),
            vm_ids: plans.iter().map(|p| p.vm.id.clone()).collect(),
        });
        mci.target_vm_count = target_vm_count;

        tracing::info!(
            "Adding SubGroup {} with {} VM(s) to MCI {}/{}",
            resolved.sub_group_id,
            size,
            ns,
            mci.id
        );
        self.record_plans(&ns, &mci, &plans).await?;
        let vms = self.run_plans(&ns, &mci, plans).await;
        self.finish(&ns, mci, vms).await
    }

    /// Write the MCI and the `Creating` records of planned VMs
    pub(crate) async fn record_plans(
        &self,
        ns: &NamespaceId,
        mci: &Mci,
        plans: &[VmPlan],
    ) -> Result<(), MciError> {
        self.state.repo.put_mci(ns, mci).await?;
        for plan in plans {
            self.state.repo.put_vm(ns, &mci.id, &plan.vm).await?;
        }
        Ok(())
    }

    /// Fan out one pipeline per plan; results come back in plan order
    pub(crate) async fn run_plans(&self, ns: &NamespaceId, mci: &Mci, plans: Vec<VmPlan>) -> Vec<Vm> {
        let ctx = Arc::new(TaskContext {
            repo: self.state.repo.clone(),
            shell: Arc::clone(&self.state.shell),
            provisioning: self.state.config.provisioning.clone(),
            remote: self.state.config.remote.clone(),
            ns: ns.clone(),
            mci: mci.id.clone(),
            install_agent: mci.install_agent,
        });

        let fallbacks: Vec<Vm> = plans.iter().map(|p| p.vm.clone()).collect();
        let mut fanout = self.state.fan_out();
        for plan in plans {
            fanout.spawn(task::run(Arc::clone(&ctx), plan));
        }

        fanout
            .join(self.state.deadline())
            .await
            .into_iter()
            .zip(fallbacks)
            .map(|(slot, mut fallback)| {
                slot.unwrap_or_else(|| {
                    fallback.status = VmStatus::Unknown;
                    fallback.system_message = Some(DEADLINE_MESSAGE.to_string());
                    fallback
                })
            })
            .collect()
    }

    /// Rewrite the MCI after a fan-out and build the response
    pub(crate) async fn finish(
        &self,
        ns: &NamespaceId,
        fallback: Mci,
        new_vms: Vec<Vm>,
    ) -> Result<MciInfo, MciError> {
        let repo = &self.state.repo;
        // Another call may have changed the record while tasks ran
        let mut mci = repo.get_mci(ns, &fallback.id).await?.unwrap_or(fallback);

        let mut fresh: HashMap<_, _> = new_vms.iter().map(|vm| (vm.id.clone(), vm)).collect();
        let mut vms: Vec<Vm> = repo
            .list_vms(ns, &mci.id)
            .await?
            .into_iter()
            .map(|stored| match fresh.remove(&stored.id) {
                Some(vm) => vm.clone(),
                None => stored,
            })
            .collect();
        vms.extend(fresh.into_values().cloned());
        vms.sort_by(|a, b| a.id.cmp(&b.id));

        let running: Vec<_> = vms.iter().filter(|vm| vm.status == VmStatus::Running).collect();
        mci.agent_installed = mci.install_agent
            && !running.is_empty()
            && running.iter().all(|vm| vm.agent_installed);
        repo.put_mci(ns, &mci).await?;

        let failures: Vec<String> = new_vms
            .iter()
            .filter(|vm| vm.status == VmStatus::Failed)
            .map(|vm| {
                format!(
                    "{}: {}",
                    vm.id,
                    vm.system_message.as_deref().unwrap_or("failed")
                )
            })
            .collect();
        tracing::info!(
            "MCI {}/{}: {} of {} new VM(s) failed",
            ns,
            mci.id,
            failures.len(),
            new_vms.len()
        );
        if !new_vms.is_empty() && failures.len() == new_vms.len() {
            return Err(MciError::AllVmsFailed {
                mci_id: mci.id.to_string(),
                failures,
            });
        }

        Ok(MciInfo::new(mci, vms))
    }
}
