//! Recursive construction of local record graphs.

use crate::error::{SyncError, SyncResult};
use crate::instance::{Instance, RemoteInstance};
use crate::mapping::{Association, Mapping, Registry};
use crate::record_type::Backends;
use crmsync_store::{Attributes, Condition, LocalRecord, RemoteQuery, RemoteRecord, WriteOrigin};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Index of a node in a [`BuildCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(usize);

#[derive(Debug, Clone)]
enum NodeState {
    /// Not yet inserted; holds the converted columns.
    Pending(Attributes),
    /// Exists in the local store.
    Persisted(LocalRecord),
}

#[derive(Debug, Clone)]
struct Node {
    mapping: Arc<Mapping>,
    remote_id: String,
    state: NodeState,
    /// Foreign key column on this node → node it points at.
    links: BTreeMap<String, NodeHandle>,
    /// Association name → associated nodes.
    associated: BTreeMap<String, Vec<NodeHandle>>,
}

/// Records materialized during one task run, indexed by
/// `(local type, remote id)`.
///
/// Sharing a cache across builds guarantees at most one local record per
/// remote record, even when several roots reach the same parent.
#[derive(Debug, Clone, Default)]
pub struct BuildCache {
    nodes: Vec<Node>,
    index: HashMap<(String, String), NodeHandle>,
}

impl BuildCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no record was visited.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Finds the node for a remote record.
    pub fn handle(&self, local_type: &str, remote_id: &str) -> Option<NodeHandle> {
        self.index
            .get(&(local_type.to_owned(), remote_id.to_owned()))
            .copied()
    }

    /// The persisted row of a node, if any.
    pub fn record(&self, handle: NodeHandle) -> Option<&LocalRecord> {
        match &self.nodes.get(handle.0)?.state {
            NodeState::Persisted(record) => Some(record),
            NodeState::Pending(_) => None,
        }
    }

    /// Nodes reached from `handle` through the named association.
    pub fn associated(&self, handle: NodeHandle, association: &str) -> &[NodeHandle] {
        self.nodes
            .get(handle.0)
            .and_then(|node| node.associated.get(association))
            .map_or(&[], Vec::as_slice)
    }

    /// Forgets every node from `len` on, along with edges pointing at them.
    ///
    /// Rows already written for those nodes stay in the store and are found
    /// again through their lookup column.
    fn truncate(&mut self, len: usize) {
        if len >= self.nodes.len() {
            return;
        }
        self.nodes.truncate(len);
        self.index.retain(|_, handle| handle.0 < len);
        for node in &mut self.nodes {
            node.links.retain(|_, target| target.0 < len);
            for handles in node.associated.values_mut() {
                handles.retain(|handle| handle.0 < len);
            }
            node.associated.retain(|_, handles| !handles.is_empty());
        }
    }

    fn push(&mut self, node: Node) -> NodeHandle {
        let handle = NodeHandle(self.nodes.len());
        self.index.insert(
            (node.mapping.local_type().to_owned(), node.remote_id.clone()),
            handle,
        );
        self.nodes.push(node);
        handle
    }

    fn is_pending(&self, handle: NodeHandle) -> bool {
        matches!(self.nodes[handle.0].state, NodeState::Pending(_))
    }

    fn local_id(&self, handle: NodeHandle) -> Option<i64> {
        self.record(handle).map(|record| record.id)
    }
}

/// Rows written by one build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// The row mirroring the root remote record.
    pub root: LocalRecord,
    /// Rows inserted, dependencies first.
    pub created: Vec<(Arc<Mapping>, LocalRecord)>,
    /// Existing rows whose foreign keys were repointed.
    pub updated: Vec<(Arc<Mapping>, LocalRecord)>,
}

impl BuildOutcome {
    /// Returns true if the build wrote nothing.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }
}

/// An association edge, identified by declaring type and name.
type Edge = (String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Mirrors a remote record locally together with its associated records.
pub struct AssociationBuilder<'a> {
    registry: &'a Registry,
    backends: &'a Backends,
    cache: &'a mut BuildCache,
}

impl<'a> AssociationBuilder<'a> {
    /// Creates a builder working on `cache`.
    pub fn new(registry: &'a Registry, backends: &'a Backends, cache: &'a mut BuildCache) -> Self {
        Self {
            registry,
            backends,
            cache,
        }
    }

    /// Builds the local graph for `root` and persists it.
    ///
    /// Records already in the cache or already linked locally are reused;
    /// associations with `build: false` only link to such records.
    ///
    /// A failed build leaves the cache as it found it, so later builds
    /// sharing the cache do not retry the failing record.
    pub fn build(&mut self, root: &RemoteInstance) -> SyncResult<BuildOutcome> {
        let checkpoint = self.cache.len();
        let outcome = self.build_graph(root);
        if outcome.is_err() {
            self.cache.truncate(checkpoint);
        }
        outcome
    }

    fn build_graph(&mut self, root: &RemoteInstance) -> SyncResult<BuildOutcome> {
        let handle = self.visit(root.mapping(), root.record().clone(), &HashSet::new())?;
        let (created, updated) = self.persist()?;
        let root = self
            .cache
            .record(handle)
            .cloned()
            .ok_or_else(|| SyncError::Worker("root record was not persisted".into()))?;
        Ok(BuildOutcome {
            root,
            created,
            updated,
        })
    }

    fn visit(
        &mut self,
        mapping: &Arc<Mapping>,
        record: RemoteRecord,
        visited: &HashSet<Edge>,
    ) -> SyncResult<NodeHandle> {
        if let Some(handle) = self.existing(mapping, &record.id)? {
            return Ok(handle);
        }

        let mut columns = mapping.fields().from_remote(&record.fields);
        columns.insert(
            mapping.lookup_column().to_owned(),
            Value::String(record.id.clone()),
        );
        let handle = self.cache.push(Node {
            mapping: Arc::clone(mapping),
            remote_id: record.id.clone(),
            state: NodeState::Pending(columns),
            links: BTreeMap::new(),
            associated: BTreeMap::new(),
        });

        for association in mapping.associations() {
            let edge = (mapping.local_type().to_owned(), association.name.clone());
            if visited.contains(&edge) {
                continue;
            }
            let mut branch = visited.clone();
            branch.insert(edge);
            if let Some((target, inverse)) = self.registry.inverse_of(mapping, association) {
                branch.insert((target.local_type().to_owned(), inverse.name.clone()));
            }

            let target = Arc::clone(self.registry.target_of(association)?);
            for associated in self.resolve(association, &target, &record)? {
                let child = if association.build {
                    Some(self.visit(&target, associated, &branch)?)
                } else {
                    self.existing(&target, &associated.id)?
                };
                if let Some(child) = child {
                    self.assign(handle, association, child);
                }
            }
        }

        Ok(handle)
    }

    /// Returns the cached node or wraps an already linked local row.
    fn existing(&mut self, mapping: &Arc<Mapping>, remote_id: &str) -> SyncResult<Option<NodeHandle>> {
        if let Some(handle) = self.cache.handle(mapping.local_type(), remote_id) {
            return Ok(Some(handle));
        }
        let row = self.backends.local.find_by(
            mapping.local_type(),
            mapping.lookup_column(),
            &Value::String(remote_id.to_owned()),
        )?;
        Ok(row.map(|row| {
            self.cache.push(Node {
                mapping: Arc::clone(mapping),
                remote_id: remote_id.to_owned(),
                state: NodeState::Persisted(row),
                links: BTreeMap::new(),
                associated: BTreeMap::new(),
            })
        }))
    }

    /// Finds the remote records an association reaches from `record`.
    fn resolve(
        &self,
        association: &Association,
        target: &Mapping,
        record: &RemoteRecord,
    ) -> SyncResult<Vec<RemoteRecord>> {
        let remote = &self.backends.remote;
        if association.kind.lookup_on_source() {
            let Some(id) = association.lookup_value(&record.fields) else {
                return Ok(Vec::new());
            };
            return Ok(remote.find(target.remote_type(), &id)?.into_iter().collect());
        }

        let mut found: Vec<RemoteRecord> = Vec::new();
        for lookup in &association.lookups {
            let query = RemoteQuery::new()
                .conditions(target.conditions().iter().cloned())
                .conditions([Condition::eq(lookup.clone(), record.id.clone())]);
            for candidate in remote.query(target.remote_type(), &query)? {
                if !found.iter().any(|r| r.id == candidate.id) {
                    found.push(candidate);
                }
            }
        }
        if !association.kind.is_collection() {
            found.truncate(1);
        }
        Ok(found)
    }

    fn assign(&mut self, source: NodeHandle, association: &Association, target: NodeHandle) {
        let node = &mut self.cache.nodes[source.0];
        let slot = node.associated.entry(association.name.clone()).or_default();
        if association.kind.is_collection() {
            if !slot.contains(&target) {
                slot.push(target);
            }
        } else {
            *slot = vec![target];
        }

        if association.kind.foreign_key_on_source() {
            node.links.insert(association.foreign_key.clone(), target);
        } else {
            self.cache.nodes[target.0]
                .links
                .insert(association.foreign_key.clone(), source);
        }
    }

    /// Inserts every pending node, then applies links to existing rows.
    #[allow(clippy::type_complexity)]
    fn persist(
        &mut self,
    ) -> SyncResult<(Vec<(Arc<Mapping>, LocalRecord)>, Vec<(Arc<Mapping>, LocalRecord)>)> {
        let mut marks = vec![Mark::Unvisited; self.cache.nodes.len()];
        let mut inserted = Vec::new();
        let mut deferred = Vec::new();

        for index in 0..self.cache.nodes.len() {
            let handle = NodeHandle(index);
            if self.cache.is_pending(handle) && marks[index] == Mark::Unvisited {
                self.insert(handle, &mut marks, &mut inserted, &mut deferred)?;
            }
        }

        // Links that closed a cycle point at rows inserted after their owner.
        for (owner, column, target) in deferred {
            if let Some(target_id) = self.cache.local_id(target) {
                let mut columns = Attributes::new();
                columns.insert(column, Value::from(target_id));
                self.update(owner, columns)?;
            }
        }

        let mut updated = Vec::new();
        for index in 0..self.cache.nodes.len() {
            let handle = NodeHandle(index);
            if inserted.contains(&handle) {
                continue;
            }
            let changes = self.stale_links(handle);
            if !changes.is_empty() {
                updated.push(handle);
                self.update(handle, changes)?;
            }
        }

        let rows = |handles: Vec<NodeHandle>, cache: &BuildCache| {
            handles
                .into_iter()
                .filter_map(|handle| {
                    let node = &cache.nodes[handle.0];
                    cache
                        .record(handle)
                        .map(|record| (Arc::clone(&node.mapping), record.clone()))
                })
                .collect::<Vec<_>>()
        };
        Ok((rows(inserted, self.cache), rows(updated, self.cache)))
    }

    fn insert(
        &mut self,
        handle: NodeHandle,
        marks: &mut [Mark],
        inserted: &mut Vec<NodeHandle>,
        deferred: &mut Vec<(NodeHandle, String, NodeHandle)>,
    ) -> SyncResult<()> {
        marks[handle.0] = Mark::InProgress;

        let links = self.cache.nodes[handle.0].links.clone();
        for (column, target) in &links {
            if !self.cache.is_pending(*target) {
                continue;
            }
            match marks[target.0] {
                Mark::Unvisited => self.insert(*target, marks, inserted, deferred)?,
                Mark::InProgress => deferred.push((handle, column.clone(), *target)),
                Mark::Done => {}
            }
        }

        let node = &self.cache.nodes[handle.0];
        let NodeState::Pending(columns) = &node.state else {
            marks[handle.0] = Mark::Done;
            return Ok(());
        };
        let mut columns = columns.clone();
        for (column, target) in &links {
            if let Some(target_id) = self.cache.local_id(*target) {
                columns.insert(column.clone(), Value::from(target_id));
            }
        }

        let mapping = Arc::clone(&node.mapping);
        let record = self
            .backends
            .local
            .insert(mapping.local_type(), columns, WriteOrigin::Engine)?;
        debug!(
            local_type = mapping.local_type(),
            local_id = record.id,
            remote_id = %self.cache.nodes[handle.0].remote_id,
            "built local record"
        );
        self.cache.nodes[handle.0].state = NodeState::Persisted(record);
        marks[handle.0] = Mark::Done;
        inserted.push(handle);
        Ok(())
    }

    /// Link columns of a persisted node that disagree with its row.
    fn stale_links(&self, handle: NodeHandle) -> Attributes {
        let node = &self.cache.nodes[handle.0];
        let Some(record) = self.cache.record(handle) else {
            return Attributes::new();
        };
        node.links
            .iter()
            .filter_map(|(column, target)| {
                let target_id = Value::from(self.cache.local_id(*target)?);
                (record.columns.get(column) != Some(&target_id)).then(|| (column.clone(), target_id))
            })
            .collect()
    }

    fn update(&mut self, handle: NodeHandle, columns: Attributes) -> SyncResult<()> {
        let Some(id) = self.cache.local_id(handle) else {
            return Ok(());
        };
        let mapping = Arc::clone(&self.cache.nodes[handle.0].mapping);
        let record = self
            .backends
            .local
            .update(mapping.local_type(), id, columns, WriteOrigin::Engine)?;
        self.cache.nodes[handle.0].state = NodeState::Persisted(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmsync_store::{
        FieldDescribe, InMemoryDatabase, InMemoryRemote, LocalStore, ManualClock, RemoteStore,
        Timestamp,
    };
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    struct Fixture {
        db: Arc<InMemoryDatabase>,
        remote: Arc<InMemoryRemote>,
        backends: Backends,
        registry: Registry,
    }

    /// users → (HasOne) profiles → (HasMany) posts, with inverses declared.
    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
        let db = Arc::new(InMemoryDatabase::new(clock.clone()));
        db.define_table("users", ["name", "contact_remote_id"]);
        db.define_table("profiles", ["bio", "user_id", "profile_remote_id"]);
        db.define_table("posts", ["title", "profile_id", "post_remote_id"]);

        let remote = Arc::new(InMemoryRemote::new(clock, "005ENGINE"));
        remote.define_object("Contact", vec![FieldDescribe::writable("LastName")]);
        remote.define_object("Profile", vec![FieldDescribe::writable("Bio__c")]);
        remote.define_object("Post", vec![FieldDescribe::writable("Title")]);

        let mut registry = Registry::new();
        registry.insert(
            Mapping::builder("users", "Contact")
                .field("name", "LastName")
                .association(Association::has_one("profile", "profiles", "user_id", "Contact__c"))
                .build(db.as_ref())
                .unwrap(),
        );
        registry.insert(
            Mapping::builder("profiles", "Profile")
                .field("bio", "Bio__c")
                .association(Association::belongs_to("user", "users", "user_id", "Contact__c"))
                .association(Association::has_many("posts", "posts", "profile_id", "Profile__c"))
                .build(db.as_ref())
                .unwrap(),
        );
        registry.insert(
            Mapping::builder("posts", "Post")
                .field("title", "Title")
                .association(Association::belongs_to(
                    "profile",
                    "profiles",
                    "profile_id",
                    "Profile__c",
                ))
                .build(db.as_ref())
                .unwrap(),
        );
        registry.validate().unwrap();

        let backends = Backends::new(db.clone(), remote.clone());
        Fixture {
            db,
            remote,
            backends,
            registry,
        }
    }

    fn root(f: &Fixture, registry: &Registry, id: &str) -> RemoteInstance {
        let record = f.remote.find("Contact", id).unwrap().unwrap();
        let mapping = registry.by_local("users").unwrap().clone();
        RemoteInstance::new(
            mapping,
            f.backends.remote.clone(),
            f.backends.fields.clone(),
            record,
        )
    }

    fn seed_chain(f: &Fixture, posts: usize) -> String {
        let contact = f
            .remote
            .insert_external("Contact", attrs(json!({ "LastName": "Doe" })))
            .unwrap();
        let profile = f
            .remote
            .insert_external("Profile", attrs(json!({ "Bio__c": "hi", "Contact__c": contact })))
            .unwrap();
        for n in 0..posts {
            f.remote
                .insert_external(
                    "Post",
                    attrs(json!({ "Title": format!("post {n}"), "Profile__c": profile })),
                )
                .unwrap();
        }
        contact
    }

    #[test]
    fn builds_chain_with_back_references() {
        let f = fixture();
        let contact = seed_chain(&f, 3);
        let mut cache = BuildCache::new();

        let outcome = AssociationBuilder::new(&f.registry, &f.backends, &mut cache)
            .build(&root(&f, &f.registry, &contact))
            .unwrap();

        assert_eq!(outcome.created.len(), 5);
        assert!(outcome.updated.is_empty());
        assert_eq!(f.db.count("users"), 1);
        assert_eq!(f.db.count("profiles"), 1);
        assert_eq!(f.db.count("posts"), 3);

        let user = f.db.rows("users").unwrap().remove(0);
        assert_eq!(outcome.root, user);
        assert_eq!(user.get("contact_remote_id"), Some(&json!(contact)));
        assert_eq!(user.get("name"), Some(&json!("Doe")));

        let profile = f.db.rows("profiles").unwrap().remove(0);
        assert_eq!(profile.get("user_id"), Some(&json!(user.id)));
        for post in f.db.rows("posts").unwrap() {
            assert_eq!(post.get("profile_id"), Some(&json!(profile.id)));
        }

        let user_handle = cache.handle("users", &contact).unwrap();
        let profile_handle = cache.associated(user_handle, "profile")[0];
        assert_eq!(cache.associated(profile_handle, "posts").len(), 3);
    }

    #[test]
    fn second_build_reuses_cache() {
        let f = fixture();
        let contact = seed_chain(&f, 2);
        let mut cache = BuildCache::new();

        AssociationBuilder::new(&f.registry, &f.backends, &mut cache)
            .build(&root(&f, &f.registry, &contact))
            .unwrap();
        let again = AssociationBuilder::new(&f.registry, &f.backends, &mut cache)
            .build(&root(&f, &f.registry, &contact))
            .unwrap();

        assert!(again.is_empty());
        assert_eq!(f.db.count("users"), 1);
        assert_eq!(f.db.count("profiles"), 1);
        assert_eq!(f.db.count("posts"), 2);
    }

    #[test]
    fn links_to_rows_that_already_exist() {
        let f = fixture();
        let contact = seed_chain(&f, 1);
        let profile_id = f.remote.records("Profile").unwrap()[0].id.clone();
        let existing = f
            .db
            .insert_external("profiles", attrs(json!({ "profile_remote_id": profile_id })))
            .unwrap();

        let mut cache = BuildCache::new();
        let outcome = AssociationBuilder::new(&f.registry, &f.backends, &mut cache)
            .build(&root(&f, &f.registry, &contact))
            .unwrap();

        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.updated.len(), 1);
        assert_eq!(f.db.count("profiles"), 1);
        assert_eq!(f.db.count("posts"), 0);

        let profile = f.db.find("profiles", existing.id).unwrap().unwrap();
        assert_eq!(profile.get("user_id"), Some(&json!(outcome.root.id)));
    }

    #[test]
    fn build_false_never_constructs() {
        let f = fixture();
        let mut registry = f.registry.clone();
        registry.insert(
            Mapping::builder("users", "Contact")
                .field("name", "LastName")
                .association(
                    Association::has_one("profile", "profiles", "user_id", "Contact__c")
                        .without_build(),
                )
                .build(f.db.as_ref())
                .unwrap(),
        );
        let contact = seed_chain(&f, 2);

        let mut cache = BuildCache::new();
        let outcome = AssociationBuilder::new(&registry, &f.backends, &mut cache)
            .build(&root(&f, &registry, &contact))
            .unwrap();

        assert_eq!(outcome.created.len(), 1);
        assert_eq!(f.db.count("profiles"), 0);
        assert_eq!(f.db.count("posts"), 0);
    }

    #[test]
    fn starting_from_a_leaf_walks_up_without_looping() {
        let f = fixture();
        seed_chain(&f, 2);
        let post = f.remote.records("Post").unwrap().remove(0);
        let mapping = f.registry.by_local("posts").unwrap().clone();
        let instance = RemoteInstance::new(
            mapping,
            f.backends.remote.clone(),
            f.backends.fields.clone(),
            post,
        );

        let mut cache = BuildCache::new();
        let outcome = AssociationBuilder::new(&f.registry, &f.backends, &mut cache)
            .build(&instance)
            .unwrap();

        // post → profile → user; the profile's other posts are reached
        // through `posts`, which is the inverse of the edge just taken.
        assert_eq!(outcome.created.len(), 3);
        assert_eq!(f.db.count("posts"), 1);
        assert_eq!(f.db.count("profiles"), 1);
        assert_eq!(f.db.count("users"), 1);
        assert_eq!(f.remote.count("Post"), 2);
    }
}
