//! Explicit comment-thread loading. Plain comment reads stay flat; callers that
//! want `replies` ask for them here.

use std::collections::{HashMap, HashSet};

use crate::models::{Comment, CommentThread, Id};
use crate::repo::{CommentRepo, RepoResult};

/// Load the thread rooted at comment `id`, replies materialized to any depth.
pub async fn load_thread<R: CommentRepo + ?Sized>(repo: &R, id: Id) -> RepoResult<CommentThread> {
    let root = repo.get_comment(id).await?;
    let all = repo.list_comments(root.post).await?;
    Ok(ThreadIndex::new(all).build(root))
}

/// Every root comment of `post` with its replies.
pub async fn load_post_threads<R: CommentRepo + ?Sized>(repo: &R, post: Id) -> RepoResult<Vec<CommentThread>> {
    let all = repo.list_comments(post).await?;
    Ok(assemble(all))
}

/// Build the forest for one post's flat comment list. Comments whose parent is
/// missing from the list are treated as roots.
pub fn assemble(comments: Vec<Comment>) -> Vec<CommentThread> {
    let ids: HashSet<Id> = comments.iter().map(|c| c.id).collect();
    let roots: Vec<Comment> = comments
        .iter()
        .filter(|c| c.parent_comment.map_or(true, |p| !ids.contains(&p)))
        .cloned()
        .collect();
    let index = ThreadIndex::new(comments);
    roots.into_iter().map(|r| index.build(r)).collect()
}

struct ThreadIndex {
    children: HashMap<Id, Vec<Comment>>,
}

impl ThreadIndex {
    /// Input order is kept for siblings; repositories return oldest first.
    fn new(comments: Vec<Comment>) -> Self {
        let mut children: HashMap<Id, Vec<Comment>> = HashMap::new();
        for c in comments {
            if let Some(parent) = c.parent_comment {
                children.entry(parent).or_default().push(c);
            }
        }
        Self { children }
    }

    fn build(&self, root: Comment) -> CommentThread {
        let mut seen = HashSet::new();
        self.build_inner(root, &mut seen)
    }

    fn build_inner(&self, node: Comment, seen: &mut HashSet<Id>) -> CommentThread {
        seen.insert(node.id);
        let replies = self
            .children
            .get(&node.id)
            .map(|kids| {
                kids.iter()
                    .filter(|k| !seen.contains(&k.id))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
            .into_iter()
            .map(|k| self.build_inner(k, seen))
            .collect();
        CommentThread { replies, ..CommentThread::leaf(node) }
    }
}
