//! Merge engine for the versioned object repository.
//!
//! When a view commits on top of a version other views have moved past,
//! each of its dirty items is reconciled with what the others committed:
//! the remote changes are collected from the store and applied to the
//! local copy, three-way, against the version both sides started from.
//!
//! # Key Types
//!
//! - [`ChangeSet`] / [`AttributeChange`] / [`ChangeKind`] -- what another view committed
//! - [`collect_changes`] -- reads a change set between two versions
//! - [`apply_changes`] / [`merge_item`] -- reconcile one cached item
//! - [`MergeCallback`] -- caller-supplied conflict resolution
//! - [`DanglingRef`] / [`unlink_dangling`] -- back-references left on peers
//! - [`MergeError`] / [`MergeReason`] -- refused merges
//!
//! # Resolution order
//!
//! Literal conflicts go to the merge callback first. A callback answering
//! [`Resolution::Default`](vor_types::Resolution::Default), or no callback,
//! defers to the item's `on_item_merge` hook. With no answer from either
//! the merge fails with [`MergeReason::Value`].

pub mod apply;
pub mod changes;
pub mod error;

#[cfg(test)]
mod fixture;

pub use apply::{
    apply_changes, merge_item, merge_value_sets, unlink_dangling, DanglingRef, MergeCallback,
    MergeOutcome,
};
pub use changes::{collect_changes, AttributeChange, ChangeKind, ChangeSet, ItemChange};
pub use error::{MergeError, MergeReason, MergeResult};
