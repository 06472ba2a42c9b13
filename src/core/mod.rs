// Copyright 2026 Media Provider Manager Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod classifier;
pub mod dispatcher;
pub mod packages;
pub mod paths;
pub mod records;
pub mod rules;
pub mod service;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    conf::config::Config,
    core::{
        classifier::Classifier,
        dispatcher::{Dispatcher, HookAdapter},
        packages::SystemPackages,
        records::{RecordStore, RecordWriter, SqliteBackend},
        rules::RuleEngine,
        service::ManagerService,
    },
    ipc::{
        protocol::ChannelDescriptor,
        server::{RpcServer, ServerHandle},
    },
    utils::{self, WarnErr},
};

pub struct Init;

pub struct StoreReady {
    pub records: RecordStore,
    pub writer: RecordWriter,
}

pub struct RulesLoaded {
    pub records: RecordStore,
    pub writer: RecordWriter,
    pub rules: Arc<RuleEngine>,
    pub service: Arc<ManagerService>,
}

pub struct Serving {
    pub records: RecordStore,
    pub writer: RecordWriter,
    pub service: Arc<ManagerService>,
    pub dispatcher: Arc<Dispatcher>,
    pub server: ServerHandle,
    pub descriptor: ChannelDescriptor,
}

/// Brings the service up in order: record store, rules, then the channel.
/// The dispatcher only exists once the initial rule snapshot is installed.
pub struct ServiceController<S> {
    config: Config,
    state: S,
}

impl ServiceController<Init> {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: Init,
        }
    }

    pub fn open_store(self) -> Result<ServiceController<StoreReady>> {
        utils::ensure_dir_exists(&self.config.data_dir)?;
        let db_path = self.config.database_path();
        let backend = SqliteBackend::open(&db_path)
            .with_context(|| format!("Failed to open record store {}", db_path.display()))?;
        let (records, writer) = RecordStore::spawn(
            backend,
            self.config.writer_queue_capacity,
            self.config.writer_batch_size,
        )
        .context("Failed to spawn record writer")?;

        tracing::info!(">> Record store: {}", db_path.display());

        Ok(ServiceController {
            config: self.config,
            state: StoreReady { records, writer },
        })
    }
}

impl ServiceController<StoreReady> {
    pub fn load_rules(self) -> Result<ServiceController<RulesLoaded>> {
        let rules = Arc::new(RuleEngine::default());
        let service = Arc::new(ManagerService::new(
            self.config.layout(),
            &self.config.data_dir,
            rules.clone(),
            self.state.records.clone(),
            Box::new(SystemPackages::new(&self.config.packages_list)),
        ));

        match service.load_settings() {
            Ok(count) => tracing::info!(">> Rules: {} installed", count),
            Err(e) => tracing::error!("Persisted settings rejected, starting without rules: {}", e),
        }

        Ok(ServiceController {
            config: self.config,
            state: RulesLoaded {
                records: self.state.records,
                writer: self.state.writer,
                rules,
                service,
            },
        })
    }
}

impl ServiceController<RulesLoaded> {
    pub fn start_channel(self) -> Result<ServiceController<Serving>> {
        utils::ensure_dir_exists(&self.config.run_dir)?;
        let token = utils::generate_session_token()?;
        let server = RpcServer::bind(&self.config.socket_path(), &token, self.state.service.clone())?;
        let descriptor = server.descriptor();

        let classifier = Classifier::new(self.config.layout(), &self.config.uri_table);
        let dispatcher = Arc::new(Dispatcher::new(
            classifier,
            self.state.rules,
            self.state.records.clone(),
        ));
        dispatcher.publish_channel(&descriptor);
        descriptor
            .save(&self.config.channel_file())
            .context("Failed to write channel descriptor")?;

        let server = server.spawn()?;
        tracing::info!(">> Manager channel ready at {}", descriptor.socket_path.display());

        Ok(ServiceController {
            config: self.config,
            state: Serving {
                records: self.state.records,
                writer: self.state.writer,
                service: self.state.service,
                dispatcher,
                server,
                descriptor,
            },
        })
    }
}

impl ServiceController<Serving> {
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.state.dispatcher.clone()
    }

    pub fn hook_adapter(&self) -> HookAdapter<Dispatcher> {
        HookAdapter::new(self.dispatcher())
    }

    pub fn service(&self) -> Arc<ManagerService> {
        self.state.service.clone()
    }

    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.state.descriptor
    }

    /// Blocks until the accept loop exits.
    pub fn wait(self) {
        self.state.server.join();
    }

    pub fn shutdown(self) {
        self.state.server.shutdown();
        self.state.records.flush().warn_on_err();
        std::fs::remove_file(self.config.channel_file()).warn_on_err();
        tracing::info!(">> Service stopped");
    }
}
