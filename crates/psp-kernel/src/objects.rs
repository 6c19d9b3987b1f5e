//! Kernel object lifetime management

use crate::thread::ThreadId;
use parking_lot::RwLock;
use psp_core::error::KernelError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Kernel object ID type (the guest-visible uid)
pub type ObjectId = u32;

/// Kernel object types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Thread,
    Callback,
    Semaphore,
    EventFlag,
    Mutex,
    MessagePipe,
    PartitionMemory,
}

impl ObjectType {
    /// Error reported when a uid does not name an object of this type
    pub fn unknown_error(self, id: ObjectId) -> KernelError {
        match self {
            Self::Thread => KernelError::UnknownThread(id),
            Self::Callback => KernelError::UnknownCallback(id),
            Self::Semaphore => KernelError::UnknownSemaphore(id),
            Self::EventFlag => KernelError::UnknownEventFlag(id),
            Self::Mutex => KernelError::UnknownMutex(id),
            Self::MessagePipe => KernelError::UnknownMessagePipe(id),
            Self::PartitionMemory => KernelError::UnknownMemoryBlock(id),
        }
    }
}

/// Trait for kernel objects
pub trait KernelObject: Send + Sync + std::any::Any {
    fn object_type(&self) -> ObjectType;
    fn id(&self) -> ObjectId;
    fn name(&self) -> &str;

    /// Drop `thread` from this object's wait queue. Returns false if it was not queued.
    fn remove_waiter(&self, _thread: ThreadId) -> bool {
        false
    }

    /// Helper for downcasting
    fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync>;
}

/// Static type tag, lets [`ObjectManager::get`] report the right unknown-id error
pub trait ObjectKind {
    const TYPE: ObjectType;
}

/// Object manager for tracking kernel objects
pub struct ObjectManager {
    next_id: AtomicU32,
    objects: RwLock<HashMap<ObjectId, Arc<dyn KernelObject>>>,
}

impl ObjectManager {
    /// Create a new object manager
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1), // Start IDs from 1 (0 means "current thread")
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Generate a new unique object ID. IDs are never reused.
    pub fn next_id(&self) -> ObjectId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a kernel object
    pub fn register(&self, object: Arc<dyn KernelObject>) -> ObjectId {
        let id = object.id();
        tracing::debug!("Registered {:?} '{}' as 0x{:x}", object.object_type(), object.name(), id);
        self.objects.write().insert(id, object);
        id
    }

    /// Unregister a kernel object of type `T`
    pub fn unregister<T: KernelObject + ObjectKind>(&self, id: ObjectId) -> Result<(), KernelError> {
        let mut objects = self.objects.write();
        match objects.get(&id) {
            Some(object) if object.object_type() == T::TYPE => {
                objects.remove(&id);
                tracing::debug!("Unregistered {:?} 0x{:x}", T::TYPE, id);
                Ok(())
            }
            _ => Err(T::TYPE.unknown_error(id)),
        }
    }

    /// Get a kernel object by ID
    pub fn get<T: KernelObject + ObjectKind>(&self, id: ObjectId) -> Result<Arc<T>, KernelError> {
        let objects = self.objects.read();
        let object = objects.get(&id).ok_or(T::TYPE.unknown_error(id))?;

        let any = Arc::clone(object).as_any();
        any.downcast::<T>().map_err(|_| T::TYPE.unknown_error(id))
    }

    /// Get an object without knowing its type
    pub fn get_dyn(&self, id: ObjectId) -> Option<Arc<dyn KernelObject>> {
        self.objects.read().get(&id).cloned()
    }

    /// Check if an object exists
    pub fn exists(&self, id: ObjectId) -> bool {
        self.objects.read().contains_key(&id)
    }

    /// Get count of objects
    pub fn count(&self) -> usize {
        self.objects.read().len()
    }

    /// Get count of objects by type
    pub fn count_by_type(&self, obj_type: ObjectType) -> usize {
        self.objects
            .read()
            .values()
            .filter(|obj| obj.object_type() == obj_type)
            .count()
    }

    /// List all registered objects
    pub fn list(&self) -> Vec<Arc<dyn KernelObject>> {
        self.objects.read().values().cloned().collect()
    }
}

impl Default for ObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestObject {
        id: ObjectId,
    }

    impl ObjectKind for TestObject {
        const TYPE: ObjectType = ObjectType::Semaphore;
    }

    impl KernelObject for TestObject {
        fn object_type(&self) -> ObjectType {
            ObjectType::Semaphore
        }

        fn id(&self) -> ObjectId {
            self.id
        }

        fn name(&self) -> &str {
            "test"
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
            self
        }
    }

    struct OtherObject {
        id: ObjectId,
    }

    impl ObjectKind for OtherObject {
        const TYPE: ObjectType = ObjectType::MessagePipe;
    }

    impl KernelObject for OtherObject {
        fn object_type(&self) -> ObjectType {
            ObjectType::MessagePipe
        }

        fn id(&self) -> ObjectId {
            self.id
        }

        fn name(&self) -> &str {
            "other"
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
            self
        }
    }

    #[test]
    fn test_object_manager() {
        let manager = ObjectManager::new();

        let obj1 = Arc::new(TestObject { id: manager.next_id() });
        let id1 = obj1.id();
        manager.register(obj1);

        assert!(manager.exists(id1));
        assert_eq!(manager.count(), 1);
        assert_eq!(manager.count_by_type(ObjectType::Semaphore), 1);

        let retrieved: Arc<TestObject> = manager.get(id1).unwrap();
        assert_eq!(retrieved.id(), id1);

        manager.unregister::<TestObject>(id1).unwrap();
        assert!(!manager.exists(id1));
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_wrong_type_reports_kind_error() {
        let manager = ObjectManager::new();
        let id = manager.next_id();
        manager.register(Arc::new(TestObject { id }));

        let result = manager.get::<OtherObject>(id);
        assert_eq!(result.err(), Some(KernelError::UnknownMessagePipe(id)));
        assert_eq!(
            manager.unregister::<OtherObject>(id),
            Err(KernelError::UnknownMessagePipe(id))
        );
        assert!(manager.exists(id));
    }

    #[test]
    fn test_ids_never_reused() {
        let manager = ObjectManager::new();
        let a = manager.next_id();
        manager.register(Arc::new(TestObject { id: a }));
        manager.unregister::<TestObject>(a).unwrap();
        let b = manager.next_id();
        assert_ne!(a, b);
        assert!(a >= 1);
    }
}
