//! Ordered per-stage hook lists. Each stage runs its callbacks in registration order and stops at the first error.

use crate::entity::Entity;
use crate::error::AppError;
use crate::predicate::Predicate;
use crate::schema::Schema;
use crate::service::QueryOption;
use crate::sql::QueryBuf;
use std::fmt;
use std::sync::Arc;

type HookResult = Result<(), AppError>;

pub type PreQueryHook = Arc<dyn Fn(&mut QueryOption) -> HookResult + Send + Sync>;
pub type PostQueryHook = Arc<dyn Fn(&QueryOption, &mut Vec<Entity>) -> HookResult + Send + Sync>;
pub type PreCreateHook = Arc<dyn Fn(&Schema, &mut Entity) -> HookResult + Send + Sync>;
pub type PostCreateHook = Arc<dyn Fn(&Schema, &Entity, u64) -> HookResult + Send + Sync>;
pub type PreUpdateHook = Arc<dyn Fn(&Schema, &[Predicate], &mut Entity) -> HookResult + Send + Sync>;
pub type PostUpdateHook = Arc<dyn Fn(&Schema, &[Predicate], &Entity, u64) -> HookResult + Send + Sync>;
pub type PreDeleteHook = Arc<dyn Fn(&Schema, &[Predicate]) -> HookResult + Send + Sync>;
pub type PostDeleteHook = Arc<dyn Fn(&Schema, &[Predicate], u64) -> HookResult + Send + Sync>;
pub type PreExecHook = Arc<dyn Fn(&QueryBuf) -> HookResult + Send + Sync>;
pub type PostExecHook = Arc<dyn Fn(&QueryBuf, u64) -> HookResult + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    pre_query: Vec<PreQueryHook>,
    post_query: Vec<PostQueryHook>,
    pre_create: Vec<PreCreateHook>,
    post_create: Vec<PostCreateHook>,
    pre_update: Vec<PreUpdateHook>,
    post_update: Vec<PostUpdateHook>,
    pre_delete: Vec<PreDeleteHook>,
    post_delete: Vec<PostDeleteHook>,
    pre_exec: Vec<PreExecHook>,
    post_exec: Vec<PostExecHook>,
}

fn run<H: ?Sized>(stage: &'static str, hooks: &[Arc<H>], mut call: impl FnMut(&H) -> HookResult) -> HookResult {
    for h in hooks {
        call(h.as_ref()).map_err(|e| AppError::hook(stage, e))?;
    }
    Ok(())
}

impl Hooks {
    pub fn new() -> Self {
        Hooks::default()
    }

    pub fn on_pre_query(
        &mut self,
        f: impl Fn(&mut QueryOption) -> HookResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.pre_query.push(Arc::new(f));
        self
    }

    pub fn on_post_query(
        &mut self,
        f: impl Fn(&QueryOption, &mut Vec<Entity>) -> HookResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.post_query.push(Arc::new(f));
        self
    }

    pub fn on_pre_create(
        &mut self,
        f: impl Fn(&Schema, &mut Entity) -> HookResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.pre_create.push(Arc::new(f));
        self
    }

    pub fn on_post_create(
        &mut self,
        f: impl Fn(&Schema, &Entity, u64) -> HookResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.post_create.push(Arc::new(f));
        self
    }

    pub fn on_pre_update(
        &mut self,
        f: impl Fn(&Schema, &[Predicate], &mut Entity) -> HookResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.pre_update.push(Arc::new(f));
        self
    }

    pub fn on_post_update(
        &mut self,
        f: impl Fn(&Schema, &[Predicate], &Entity, u64) -> HookResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.post_update.push(Arc::new(f));
        self
    }

    pub fn on_pre_delete(
        &mut self,
        f: impl Fn(&Schema, &[Predicate]) -> HookResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.pre_delete.push(Arc::new(f));
        self
    }

    pub fn on_post_delete(
        &mut self,
        f: impl Fn(&Schema, &[Predicate], u64) -> HookResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.post_delete.push(Arc::new(f));
        self
    }

    pub fn on_pre_exec(&mut self, f: impl Fn(&QueryBuf) -> HookResult + Send + Sync + 'static) -> &mut Self {
        self.pre_exec.push(Arc::new(f));
        self
    }

    pub fn on_post_exec(
        &mut self,
        f: impl Fn(&QueryBuf, u64) -> HookResult + Send + Sync + 'static,
    ) -> &mut Self {
        self.post_exec.push(Arc::new(f));
        self
    }

    pub(crate) fn pre_query(&self, opt: &mut QueryOption) -> HookResult {
        run("pre query", &self.pre_query, |h| h(&mut *opt))
    }

    pub(crate) fn post_query(&self, opt: &QueryOption, entities: &mut Vec<Entity>) -> HookResult {
        run("post query", &self.post_query, |h| h(opt, &mut *entities))
    }

    pub(crate) fn pre_create(&self, schema: &Schema, entity: &mut Entity) -> HookResult {
        run("pre create", &self.pre_create, |h| h(schema, &mut *entity))
    }

    pub(crate) fn post_create(&self, schema: &Schema, entity: &Entity, id: u64) -> HookResult {
        run("post create", &self.post_create, |h| h(schema, entity, id))
    }

    pub(crate) fn pre_update(&self, schema: &Schema, predicates: &[Predicate], entity: &mut Entity) -> HookResult {
        run("pre update", &self.pre_update, |h| h(schema, predicates, &mut *entity))
    }

    pub(crate) fn post_update(
        &self,
        schema: &Schema,
        predicates: &[Predicate],
        entity: &Entity,
        affected: u64,
    ) -> HookResult {
        run("post update", &self.post_update, |h| h(schema, predicates, entity, affected))
    }

    pub(crate) fn pre_delete(&self, schema: &Schema, predicates: &[Predicate]) -> HookResult {
        run("pre delete", &self.pre_delete, |h| h(schema, predicates))
    }

    pub(crate) fn post_delete(&self, schema: &Schema, predicates: &[Predicate], affected: u64) -> HookResult {
        run("post delete", &self.post_delete, |h| h(schema, predicates, affected))
    }

    pub(crate) fn pre_exec(&self, q: &QueryBuf) -> HookResult {
        run("pre exec", &self.pre_exec, |h| h(q))
    }

    pub(crate) fn post_exec(&self, q: &QueryBuf, affected: u64) -> HookResult {
        run("post exec", &self.post_exec, |h| h(q, affected))
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("pre_query", &self.pre_query.len())
            .field("post_query", &self.post_query.len())
            .field("pre_create", &self.pre_create.len())
            .field("post_create", &self.post_create.len())
            .field("pre_update", &self.pre_update.len())
            .field("post_update", &self.post_update.len())
            .field("pre_delete", &self.pre_delete.len())
            .field("post_delete", &self.post_delete.len())
            .field("pre_exec", &self.pre_exec.len())
            .field("post_exec", &self.post_exec.len())
            .finish()
    }
}
