//! URI matcher chain.
//!
//! Route resolution walks an ordered list of matchers over the request's
//! path segments (the path split on `/`, so index 0 is the empty segment
//! before the leading slash). Trailing slashes are stripped before
//! splitting, so `/company/` names the same resource as `/company`. A
//! matcher either produces a terminal verdict or delegates to the next
//! link. The built-in order is company, then product, then a tail link for
//! everything nested deeper; new resources are added by appending links,
//! not by branching inside an existing one.

use axum::http::Method;

use crate::commands::REGISTER_COMPANY_KEY;

/// Terminal decision for a routed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Wrap the request body as an envelope under this key and dispatch it.
    DispatchEnvelope { key: &'static str },
    /// The request names a resource whose handling is not implemented.
    Unimplemented { resource: &'static str },
}

/// One matcher's verdict on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Action(RouteAction),
    /// Pass the request to the next link in the chain.
    Delegate,
    NotFound,
}

/// A pure function from method and path segments to a routing verdict.
pub trait UriMatcher: Send + Sync {
    fn match_request(&self, method: &Method, segments: &[&str]) -> RouteOutcome;
}

/// Ordered matcher chain; the first terminal verdict wins and an exhausted
/// chain means not found.
pub struct MatcherChain {
    links: Vec<Box<dyn UriMatcher>>,
}

impl MatcherChain {
    /// The gateway's standard chain.
    pub fn standard() -> Self {
        Self::with_links(vec![
            Box::new(CompaniesMatcher),
            Box::new(CompanyMatcher),
            Box::new(ProductMatcher),
            Box::new(NestedResourceMatcher),
        ])
    }

    pub fn with_links(links: Vec<Box<dyn UriMatcher>>) -> Self {
        Self { links }
    }

    /// Resolve `path` through the chain. `None` is a 404.
    pub fn route(&self, method: &Method, path: &str) -> Option<RouteAction> {
        // a trailing slash does not make a distinct resource
        let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
        for link in &self.links {
            match link.match_request(method, &segments) {
                RouteOutcome::Action(action) => return Some(action),
                RouteOutcome::NotFound => return None,
                RouteOutcome::Delegate => continue,
            }
        }
        None
    }
}

/// `/companies`: collection stubs, nothing nested below them.
struct CompaniesMatcher;

impl UriMatcher for CompaniesMatcher {
    fn match_request(&self, method: &Method, segments: &[&str]) -> RouteOutcome {
        if segments.get(1) != Some(&"companies") {
            return RouteOutcome::Delegate;
        }
        if segments.len() != 2 {
            return RouteOutcome::NotFound;
        }
        if method == Method::GET || method == Method::POST {
            RouteOutcome::Action(RouteAction::Unimplemented {
                resource: "company collection",
            })
        } else {
            RouteOutcome::NotFound
        }
    }
}

/// `/company` and `/company/{id}`; deeper paths delegate onward when the id
/// is valid.
struct CompanyMatcher;

impl UriMatcher for CompanyMatcher {
    fn match_request(&self, method: &Method, segments: &[&str]) -> RouteOutcome {
        if segments.get(1) != Some(&"company") {
            return RouteOutcome::NotFound;
        }
        match segments.len() {
            2 => {
                if method == Method::POST {
                    RouteOutcome::Action(RouteAction::DispatchEnvelope {
                        key: REGISTER_COMPANY_KEY,
                    })
                } else if method == Method::GET {
                    RouteOutcome::Action(RouteAction::Unimplemented {
                        resource: "company listing",
                    })
                } else {
                    RouteOutcome::NotFound
                }
            }
            3 => {
                if !is_valid_id(segments[2]) {
                    return RouteOutcome::NotFound;
                }
                if method == Method::GET || method == Method::POST {
                    RouteOutcome::Action(RouteAction::Unimplemented {
                        resource: "single company",
                    })
                } else {
                    RouteOutcome::NotFound
                }
            }
            _ => {
                if is_valid_id(segments[2]) {
                    RouteOutcome::Delegate
                } else {
                    RouteOutcome::NotFound
                }
            }
        }
    }
}

/// `/company/{id}/products` and `/company/{id}/product/{id}`.
struct ProductMatcher;

impl UriMatcher for ProductMatcher {
    fn match_request(&self, method: &Method, segments: &[&str]) -> RouteOutcome {
        // only 4+ segment paths with a valid company id are delegated here
        match segments.get(3) {
            Some(&"products") => {
                if segments.len() != 4 {
                    return RouteOutcome::NotFound;
                }
                if method == Method::GET || method == Method::POST {
                    RouteOutcome::Action(RouteAction::Unimplemented {
                        resource: "product collection",
                    })
                } else {
                    RouteOutcome::NotFound
                }
            }
            Some(&"product") => {
                if segments.len() < 5 || !is_valid_id(segments[4]) {
                    return RouteOutcome::NotFound;
                }
                if segments.len() == 5 {
                    if method == Method::GET || method == Method::POST {
                        RouteOutcome::Action(RouteAction::Unimplemented {
                            resource: "single product",
                        })
                    } else {
                        RouteOutcome::NotFound
                    }
                } else {
                    RouteOutcome::Delegate
                }
            }
            _ => RouteOutcome::NotFound,
        }
    }
}

/// Catches everything delegated past the product link.
struct NestedResourceMatcher;

impl UriMatcher for NestedResourceMatcher {
    fn match_request(&self, _method: &Method, _segments: &[&str]) -> RouteOutcome {
        RouteOutcome::Action(RouteAction::Unimplemented {
            resource: "nested resource",
        })
    }
}

/// A valid path id is non-empty, all ASCII digits, and positive.
fn is_valid_id(segment: &str) -> bool {
    !segment.is_empty()
        && segment.chars().all(|c| c.is_ascii_digit())
        && segment.parse::<u64>().map(|id| id > 0).unwrap_or(false)
}
