use crate::db::{ArticlePatch, ArticleQuery, Database, NewArticle};
use crate::errors::{AppError, AppResult};
use crate::models::{
    normalize_parent_id, Article, ArticleAbout, ArticleFilter, ArticleSearch, CreateArticlePayload, Man,
    PraisePayload, UpdateArticlePayload, DEL_DELETED, DEL_LIVE, FLAG_ON, STATE_PUBLISHED,
};
use crate::policy;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ArticleService {
    db: Arc<Database>,
}

impl ArticleService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Creates an article authored by `actor` inside a live manual the actor
    /// owns or administers.
    pub fn create(&self, actor: &str, payload: CreateArticlePayload) -> AppResult<Article> {
        if actor.is_empty() {
            return Err(AppError::Validation("createBy cannot be empty".to_string()));
        }
        if payload.man_id.is_empty() {
            return Err(AppError::Validation("manId cannot be empty".to_string()));
        }

        let man = self.live_man(&payload.man_id)?;
        policy::ensure_member(actor, privileged(&man))?;

        let parent_id = normalize_parent_id(payload.parent_id.as_deref());
        if let Some(parent_id) = &parent_id {
            self.ensure_parent(&man.id, parent_id, None)?;
        }

        let article = self.db.insert_article(NewArticle {
            title: payload.title,
            des: payload.des,
            content: payload.content,
            state: payload.state.unwrap_or(STATE_PUBLISHED),
            man_id: man.id,
            author_list: payload.author_list,
            enable_comment: payload.enable_comment.unwrap_or(FLAG_ON),
            enable_praise: payload.enable_praise.unwrap_or(FLAG_ON),
            parent_id,
            index: payload.index.unwrap_or(0),
            create_by: actor.to_string(),
        })?;

        tracing::info!(
            article_id = %article.id,
            man_id = %article.man_id,
            parent_id = article.parent_id.as_deref().unwrap_or("0"),
            user_id = actor,
            "article created"
        );
        Ok(article)
    }

    /// Partial patch of the live article `article_id` authored by `actor`.
    pub fn update(&self, actor: &str, article_id: &str, payload: UpdateArticlePayload) -> AppResult<()> {
        if article_id.is_empty() {
            return Err(AppError::Validation("id cannot be empty".to_string()));
        }

        let parent_id = payload.parent_id.map(|raw| normalize_parent_id(Some(raw.as_str())));
        if let Some(Some(new_parent)) = &parent_id {
            let (current, man) = self.live_article(article_id)?;
            if current.create_by != actor {
                return Err(AppError::NotFound("article cannot find".to_string()));
            }
            self.ensure_parent(&man.id, new_parent, Some(article_id))?;
        }

        let patch = ArticlePatch {
            title: payload.title,
            des: payload.des,
            content: payload.content,
            state: payload.state,
            author_list: payload.author_list,
            enable_comment: payload.enable_comment,
            enable_praise: payload.enable_praise,
            parent_id,
            index: payload.index,
            del: payload.del.filter(|del| *del == DEL_DELETED),
        };

        if !self.db.update_article(article_id, actor, &patch)? {
            return Err(AppError::NotFound("article cannot find".to_string()));
        }
        tracing::info!(article_id, user_id = actor, deleted = patch.del.is_some(), "article updated");
        Ok(())
    }

    /// Articles authored by `actor`, narrowed by the caller's filter.
    pub fn find(&self, actor: &str, filter: &ArticleFilter) -> AppResult<Vec<Article>> {
        if actor.is_empty() {
            return Err(AppError::Validation("createBy cannot be empty".to_string()));
        }
        let query = ArticleQuery {
            title: filter.title.clone(),
            des: filter.des.clone(),
            state: filter.state,
            create_by: Some(actor.to_string()),
            man_id: filter.man_id.clone(),
            site_id: filter.site_id.clone(),
            parent_id: filter.parent_id.as_deref().map(|raw| normalize_parent_id(Some(raw))),
            ..ArticleQuery::default()
        };
        self.db.find_articles(&query)
    }

    /// Keyword search over title, summary and body across all authors.
    pub fn search(&self, filter: &ArticleSearch) -> AppResult<Vec<Article>> {
        let query = ArticleQuery {
            search_key: filter.search_key.clone(),
            state: filter.state,
            create_by: filter.create_by.clone(),
            man_id: filter.man_id.clone(),
            site_id: filter.site_id.clone(),
            ..ArticleQuery::default()
        };
        let articles = self.db.find_articles(&query)?;
        tracing::debug!(count = articles.len(), "article search");
        Ok(articles)
    }

    pub fn detail(&self, article_id: &str, actor: Option<&str>) -> AppResult<Article> {
        let (article, man) = self.live_article(article_id)?;
        ensure_article_readable(&article, &man, actor)?;
        Ok(article)
    }

    /// Detail plus the owning manual, its site and the praise tally.
    pub fn detail_about(&self, article_id: &str, actor: Option<&str>) -> AppResult<ArticleAbout> {
        let (article, man) = self.live_article(article_id)?;
        ensure_article_readable(&article, &man, actor)?;

        let site = self.db.get_site(&man.site_id)?;
        let praise_count = self.db.count_praise(&article.id)?;
        Ok(ArticleAbout {
            article,
            man,
            site,
            praise_count,
        })
    }

    /// Sets `actor`'s praise on an article. Repeating the same flag is a no-op.
    pub fn praise(&self, actor: &str, article_id: &str, payload: PraisePayload) -> AppResult<()> {
        if actor.is_empty() {
            return Err(AppError::Validation("createBy cannot be empty".to_string()));
        }
        let (article, _) = self.live_article(article_id)?;
        if payload.praise && article.enable_praise != FLAG_ON {
            return Err(AppError::Authorization("praise is disabled for this article".to_string()));
        }

        let record = self.db.set_praise(actor, &article.id, payload.praise)?;
        tracing::info!(
            article_id = %article.id,
            user_id = actor,
            praise = record.map(|record| record.praise).unwrap_or(false),
            "article praise set"
        );
        Ok(())
    }

    pub fn praise_count(&self, article_id: &str) -> AppResult<i64> {
        self.db.count_praise(article_id)
    }

    fn live_man(&self, man_id: &str) -> AppResult<Man> {
        self.db
            .get_man(man_id)?
            .filter(|man| man.del == DEL_LIVE)
            .ok_or_else(|| AppError::NotFound("man cannot find".to_string()))
    }

    /// A live article together with its manual. An article whose manual is
    /// gone or deleted is not found either.
    fn live_article(&self, article_id: &str) -> AppResult<(Article, Man)> {
        let not_found = || AppError::NotFound("article cannot find".to_string());
        let article = self
            .db
            .get_article(article_id)?
            .filter(|article| article.del == DEL_LIVE)
            .ok_or_else(not_found)?;
        let man = self
            .db
            .get_man(&article.man_id)?
            .filter(|man| man.del == DEL_LIVE)
            .ok_or_else(not_found)?;
        Ok((article, man))
    }

    /// A parent must be a live article of the same manual. When `moving` is
    /// set, the parent may be neither that article nor one of its descendants.
    fn ensure_parent(&self, man_id: &str, parent_id: &str, moving: Option<&str>) -> AppResult<()> {
        let parent = self
            .db
            .get_article(parent_id)?
            .filter(|parent| parent.del == DEL_LIVE && parent.man_id == man_id)
            .ok_or_else(|| AppError::Validation(format!("parent article {} is not in this man", parent_id)))?;

        let Some(moving) = moving else {
            return Ok(());
        };

        let mut visited = HashSet::new();
        let mut cursor = Some(parent);
        while let Some(node) = cursor {
            if node.id == moving {
                return Err(AppError::Validation("article cannot be nested under itself".to_string()));
            }
            if !visited.insert(node.id.clone()) {
                break;
            }
            cursor = match node.parent_id {
                Some(next) => self.db.get_article(&next)?,
                None => None,
            };
        }
        Ok(())
    }
}

fn privileged(man: &Man) -> impl Iterator<Item = &str> {
    std::iter::once(man.create_by.as_str()).chain(man.admins.iter().map(String::as_str))
}

fn ensure_article_readable(article: &Article, man: &Man, actor: Option<&str>) -> AppResult<()> {
    let members = std::iter::once(article.create_by.as_str()).chain(privileged(man));
    policy::ensure_readable(article.state, actor, members)
}

#[cfg(test)]
mod tests {
    use super::ArticleService;
    use crate::db::{Database, ManPatch, NewMan};
    use crate::errors::AppError;
    use crate::models::{
        ArticleFilter, ArticleSearch, CreateArticlePayload, Man, PraisePayload, UpdateArticlePayload, DEL_DELETED,
        STATE_DRAFT, STATE_PUBLISHED,
    };
    use std::sync::Arc;

    struct Fixture {
        _dir: tempfile::TempDir,
        db: Arc<Database>,
        service: ArticleService,
        man: Man,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("test.db")).expect("db"));
        let site = db.insert_site("owner", Some("docs")).expect("site");
        let man = db
            .insert_man(NewMan {
                name: "Guide".to_string(),
                cover: None,
                des: None,
                state: STATE_PUBLISHED,
                create_by: "owner".to_string(),
                site_id: site.id,
                enable_comment: 1,
                enable_praise: 1,
            })
            .expect("man");
        let service = ArticleService::new(db.clone());
        Fixture {
            _dir: dir,
            db,
            service,
            man,
        }
    }

    fn article(man_id: &str, title: &str, parent_id: Option<&str>, index: i64) -> CreateArticlePayload {
        CreateArticlePayload {
            title: title.to_string(),
            content: Some(format!("{} body", title)),
            man_id: man_id.to_string(),
            author_list: vec!["owner".to_string()],
            parent_id: parent_id.map(ToString::to_string),
            index: Some(index),
            ..CreateArticlePayload::default()
        }
    }

    #[test]
    fn create_nests_under_parent_of_same_manual() {
        let fx = fixture();
        let root = fx.service.create("owner", article(&fx.man.id, "Intro", Some("0"), 0)).expect("root");
        assert_eq!(root.parent_id, None);
        assert_eq!(root.create_by, "owner");

        let child = fx
            .service
            .create("owner", article(&fx.man.id, "Details", Some(&root.id), 0))
            .expect("child");
        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));

        let other = fx
            .db
            .insert_man(NewMan {
                name: "Other".to_string(),
                cover: None,
                des: None,
                state: STATE_PUBLISHED,
                create_by: "owner".to_string(),
                site_id: fx.man.site_id.clone(),
                enable_comment: 1,
                enable_praise: 1,
            })
            .expect("other man");
        let error = fx
            .service
            .create("owner", article(&other.id, "Stray", Some(&root.id), 0))
            .expect_err("cross-manual parent");
        assert!(matches!(error, AppError::Validation(_)));
    }

    #[test]
    fn create_requires_manual_membership() {
        let fx = fixture();
        let error = fx
            .service
            .create("stranger", article(&fx.man.id, "Intro", None, 0))
            .expect_err("not a member");
        assert!(matches!(error, AppError::Authorization(_)));

        let missing = fx
            .service
            .create("owner", article("no-such-man", "Intro", None, 0))
            .expect_err("missing man");
        assert!(matches!(missing, AppError::NotFound(_)));
    }

    #[test]
    fn update_is_scoped_to_author_and_rejects_cycles() {
        let fx = fixture();
        let root = fx.service.create("owner", article(&fx.man.id, "Root", None, 0)).expect("root");
        let child = fx
            .service
            .create("owner", article(&fx.man.id, "Child", Some(&root.id), 0))
            .expect("child");

        let cycle = fx
            .service
            .update(
                "owner",
                &root.id,
                UpdateArticlePayload {
                    parent_id: Some(child.id.clone()),
                    ..UpdateArticlePayload::default()
                },
            )
            .expect_err("cycle");
        assert!(matches!(cycle, AppError::Validation(_)));

        let foreign = fx
            .service
            .update(
                "stranger",
                &root.id,
                UpdateArticlePayload {
                    title: Some("Mine".to_string()),
                    ..UpdateArticlePayload::default()
                },
            )
            .expect_err("not author");
        assert!(matches!(foreign, AppError::NotFound(_)));

        fx.service
            .update(
                "owner",
                &child.id,
                UpdateArticlePayload {
                    parent_id: Some("0".to_string()),
                    index: Some(3),
                    del: Some(0),
                    ..UpdateArticlePayload::default()
                },
            )
            .expect("detach");
        let moved = fx.db.get_article(&child.id).expect("get").expect("exists");
        assert_eq!(moved.parent_id, None);
        assert_eq!(moved.index, 3);
        assert_eq!(moved.del, 0);
    }

    #[test]
    fn find_only_lists_own_articles() {
        let fx = fixture();
        fx.db
            .update_man(
                &fx.man.id,
                "owner",
                &ManPatch {
                    admins: Some(vec!["helper".to_string()]),
                    ..ManPatch::default()
                },
            )
            .expect("add admin");
        let mine = fx.service.create("owner", article(&fx.man.id, "Mine", None, 0)).expect("mine");
        fx.service.create("helper", article(&fx.man.id, "Theirs", None, 1)).expect("theirs");

        let found = fx.service.find("owner", &ArticleFilter::default()).expect("find");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, mine.id);

        let searched = fx
            .service
            .search(&ArticleSearch {
                search_key: Some("body".to_string()),
                man_id: Some(fx.man.id.clone()),
                ..ArticleSearch::default()
            })
            .expect("search");
        assert_eq!(searched.len(), 2);
    }

    #[test]
    fn find_requires_an_actor() {
        let fx = fixture();
        let mut draft = article(&fx.man.id, "Secret draft", None, 0);
        draft.state = Some(STATE_DRAFT);
        fx.service.create("owner", draft).expect("draft");

        let error = fx.service.find("", &ArticleFilter::default()).expect_err("anonymous listing");
        assert!(matches!(error, AppError::Validation(_)));
    }

    #[test]
    fn deleted_manual_hides_its_articles() {
        let fx = fixture();
        let mut draft = article(&fx.man.id, "Intro", None, 0);
        draft.state = Some(STATE_DRAFT);
        let intro = fx.service.create("owner", draft).expect("article");

        fx.db
            .update_man(
                &fx.man.id,
                "owner",
                &ManPatch {
                    del: Some(DEL_DELETED),
                    ..ManPatch::default()
                },
            )
            .expect("delete man")
            .expect("matched");

        for actor in [Some("owner"), None] {
            assert!(matches!(fx.service.detail(&intro.id, actor), Err(AppError::NotFound(_))));
            assert!(matches!(
                fx.service.detail_about(&intro.id, actor),
                Err(AppError::NotFound(_))
            ));
        }
        assert!(matches!(
            fx.service.praise("reader", &intro.id, PraisePayload { praise: true }),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            fx.service.update(
                "owner",
                &intro.id,
                UpdateArticlePayload {
                    title: Some("Renamed".to_string()),
                    ..UpdateArticlePayload::default()
                },
            ),
            Err(AppError::NotFound(_))
        ));
        assert!(fx.service.find("owner", &ArticleFilter::default()).expect("find").is_empty());
        let searched = fx
            .service
            .search(&ArticleSearch {
                search_key: Some("Intro".to_string()),
                ..ArticleSearch::default()
            })
            .expect("search");
        assert!(searched.is_empty());
    }

    #[test]
    fn detail_visibility_and_soft_delete() {
        let fx = fixture();
        let mut draft = article(&fx.man.id, "Draft", None, 0);
        draft.state = Some(STATE_DRAFT);
        let draft = fx.service.create("owner", draft).expect("draft");
        let published = fx.service.create("owner", article(&fx.man.id, "Live", None, 1)).expect("live");

        fx.service.detail(&draft.id, Some("owner")).expect("owner");
        fx.service.detail(&draft.id, None).expect("anonymous sees draft marker");
        assert!(matches!(
            fx.service.detail(&draft.id, Some("stranger")),
            Err(AppError::Authorization(_))
        ));
        assert!(matches!(
            fx.service.detail(&published.id, None),
            Err(AppError::Authorization(_))
        ));

        let about = fx.service.detail_about(&draft.id, Some("owner")).expect("about");
        assert_eq!(about.man.id, fx.man.id);
        assert_eq!(about.site.map(|site| site.create_by), Some("owner".to_string()));
        assert_eq!(about.praise_count, 0);

        fx.service
            .update(
                "owner",
                &draft.id,
                UpdateArticlePayload {
                    del: Some(DEL_DELETED),
                    ..UpdateArticlePayload::default()
                },
            )
            .expect("delete");
        assert!(matches!(
            fx.service.detail(&draft.id, Some("owner")),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn praise_toggles_one_record() {
        let fx = fixture();
        let target = fx.service.create("owner", article(&fx.man.id, "Intro", None, 0)).expect("article");

        fx.service
            .praise("reader", &target.id, PraisePayload { praise: true })
            .expect("praise");
        fx.service
            .praise("reader", &target.id, PraisePayload { praise: true })
            .expect("praise again");
        assert_eq!(fx.db.list_praise(&target.id).expect("list").len(), 1);
        assert_eq!(fx.service.praise_count(&target.id).expect("count"), 1);

        fx.service
            .praise("reader", &target.id, PraisePayload::default())
            .expect("unpraise");
        assert_eq!(fx.service.praise_count(&target.id).expect("count"), 0);
        fx.service
            .praise("reader", &target.id, PraisePayload { praise: true })
            .expect("praise again");
        assert_eq!(fx.db.list_praise(&target.id).expect("list").len(), 1);
        assert_eq!(fx.service.praise_count(&target.id).expect("count"), 1);
    }

    #[test]
    fn praise_respects_article_flag() {
        let fx = fixture();
        let mut payload = article(&fx.man.id, "Quiet", None, 0);
        payload.enable_praise = Some(0);
        let quiet = fx.service.create("owner", payload).expect("article");

        let error = fx
            .service
            .praise("reader", &quiet.id, PraisePayload { praise: true })
            .expect_err("disabled");
        assert!(matches!(error, AppError::Authorization(_)));
        assert!(matches!(
            fx.service.praise("reader", "missing", PraisePayload { praise: true }),
            Err(AppError::NotFound(_))
        ));
    }
}
