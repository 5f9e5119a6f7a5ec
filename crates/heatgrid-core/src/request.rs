//! Outstanding asynchronous communication requests.

use tracing::warn;

/// Outcome of waiting on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// The peer consumed the data.
    Completed,
    /// The peer went away before consuming the data.
    Cancelled,
}

/// A non-blocking operation that can be waited on.
///
/// `wait` never fails and never times out: whatever happened on the transport, the caller gets
/// control back and may release the buffers the request referred to.
pub trait CommRequest: Send {
    /// Block until the request is complete.
    fn wait(&mut self) -> RequestStatus;

    /// Poll the request; `None` while it is still in flight.
    fn test(&mut self) -> Option<RequestStatus>;
}

impl<R: CommRequest + ?Sized> CommRequest for Box<R> {
    fn wait(&mut self) -> RequestStatus {
        (**self).wait()
    }

    fn test(&mut self) -> Option<RequestStatus> {
        (**self).test()
    }
}

/// A request that is already complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletedRequest;

impl CommRequest for CompletedRequest {
    fn wait(&mut self) -> RequestStatus {
        RequestStatus::Completed
    }

    fn test(&mut self) -> Option<RequestStatus> {
        Some(RequestStatus::Completed)
    }
}

/// Several requests waited on together.
///
/// Completes when every member completed; reports `Cancelled` if any member was cancelled.
pub struct RequestSet<R> {
    requests: Vec<R>,
}

impl<R> Default for RequestSet<R> {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
        }
    }
}

impl<R: CommRequest> RequestSet<R> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request.
    pub fn push(&mut self, request: R) {
        self.requests.push(request);
    }

    /// Number of requests held.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Wait on everything and leave the set empty.
    pub fn wait_all(&mut self) -> RequestStatus {
        let status = self.wait();
        self.requests.clear();
        status
    }
}

impl<R: CommRequest> CommRequest for RequestSet<R> {
    fn wait(&mut self) -> RequestStatus {
        let mut status = RequestStatus::Completed;
        for request in &mut self.requests {
            if request.wait() == RequestStatus::Cancelled {
                status = RequestStatus::Cancelled;
            }
        }
        if status == RequestStatus::Cancelled {
            warn!(
                "{} request(s) waited, at least one cancelled by its peer",
                self.requests.len()
            );
        }
        status
    }

    fn test(&mut self) -> Option<RequestStatus> {
        let mut status = RequestStatus::Completed;
        for request in &mut self.requests {
            match request.test()? {
                RequestStatus::Completed => {}
                RequestStatus::Cancelled => status = RequestStatus::Cancelled,
            }
        }
        Some(status)
    }
}

impl<R: CommRequest> FromIterator<R> for RequestSet<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        Self {
            requests: iter.into_iter().collect(),
        }
    }
}
