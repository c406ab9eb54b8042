//! Slab storage for in-flight requests.
//!
//! Queues and events refer to requests by `RequestId`; the pool is the one
//! owner of the `Request` values. The module named in `Request::owner`
//! releases the slot when the completion reaches it.

use crate::Request;

/// Stable handle to a pooled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(usize);

/// Slab of live requests.
#[derive(Default)]
pub struct RequestPool {
    slots: Vec<Option<Request>>,
    free: Vec<usize>,
}

impl RequestPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, request: Request) -> RequestId {
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(request);
            RequestId(index)
        } else {
            self.slots.push(Some(request));
            RequestId(self.slots.len() - 1)
        }
    }

    #[must_use]
    pub fn get(&self, id: RequestId) -> &Request {
        self.slots[id.0]
            .as_ref()
            .expect("request released while still referenced")
    }

    pub fn get_mut(&mut self, id: RequestId) -> &mut Request {
        self.slots[id.0]
            .as_mut()
            .expect("request released while still referenced")
    }

    /// Release the slot, returning the request.
    pub fn remove(&mut self, id: RequestId) -> Request {
        let request = self.slots[id.0]
            .take()
            .expect("request released twice");
        self.free.push(id.0);
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, ModulePath, OpType};

    fn request() -> Request {
        Request::new(OpType::Read, Address::new(0x1000), ModulePath::Driver)
    }

    #[test]
    fn insert_get_remove() {
        let mut pool = RequestPool::new();
        let id = pool.insert(request());
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(id).address.physical(), 0x1000);
        let req = pool.remove(id);
        assert_eq!(req.op, OpType::Read);
        assert!(pool.is_empty());
    }

    #[test]
    fn slots_are_reused() {
        let mut pool = RequestPool::new();
        let a = pool.insert(request());
        pool.remove(a);
        let b = pool.insert(request());
        let c = pool.insert(request());
        assert_eq!(pool.len(), 2);
        assert_ne!(b, c);
    }
}
