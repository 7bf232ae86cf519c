use std::sync::Arc;

use crate::admin::AdminService;
use crate::bindings::BindingService;
use crate::checkin::CheckInService;
use crate::config::BotConfig;
use crate::enrollment::EnrollmentService;
use crate::gateway::ChatGateway;
use crate::heist::HeistService;
use crate::ledger::QuotaLedger;
use crate::reconciliation::ReconciliationWorkflow;
use crate::store::{BindingStore, HeistLogStore};
use crate::website::AccountClient;

/// Every service, wired against one storage backend, one account client and one gateway.
pub struct Services {
    pub config: Arc<BotConfig>,
    pub bindings: BindingService,
    pub ledger: QuotaLedger,
    pub enrollment: EnrollmentService,
    pub check_in: CheckInService,
    pub heist: HeistService,
    pub admin: AdminService,
    pub reconciliation: Arc<ReconciliationWorkflow>,
}

impl Services {
    pub fn build(
        config: Arc<BotConfig>,
        binding_store: Arc<dyn BindingStore>,
        heist_store: Arc<dyn HeistLogStore>,
        accounts: Arc<dyn AccountClient>,
        gateway: Arc<dyn ChatGateway>,
    ) -> Self {
        let bindings = BindingService::new(binding_store);
        let ledger = QuotaLedger::new(accounts.clone(), heist_store);
        Self {
            enrollment: EnrollmentService::new(
                config.clone(),
                bindings.clone(),
                accounts.clone(),
                gateway.clone(),
            ),
            check_in: CheckInService::new(config.clone(), bindings.clone(), ledger.clone()),
            heist: HeistService::new(config.clone(), bindings.clone(), ledger.clone()),
            admin: AdminService::new(config.clone(), bindings.clone(), ledger.clone()),
            reconciliation: Arc::new(ReconciliationWorkflow::new(
                config.clone(),
                bindings.clone(),
                accounts,
                gateway,
            )),
            config,
            bindings,
            ledger,
        }
    }
}
