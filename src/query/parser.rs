//! Declarative query parser.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::coerce::coerce_filter;
use super::rewrite::{find_sites, related_ids, replace_with_in, LeftQuery, LEFTQUERY, SUBQUERY};
use super::{ParsedQuery, Query, QuerySource};
use crate::config::DataConfig;
use crate::document::collect_path;
use crate::error::{DataError, DataResult};
use crate::property::is_identifier;
use crate::schema::{Model, ModelRegistry};
use crate::storage::FindOptions;

/// Parses queries against the models of one registry.
pub struct QueryParser<'a> {
    registry: &'a ModelRegistry,
    config: &'a DataConfig,
    source: Option<&'a dyn QuerySource>,
}

impl<'a> QueryParser<'a> {
    pub fn new(registry: &'a ModelRegistry, config: &'a DataConfig) -> Self {
        Self {
            registry,
            config,
            source: None,
        }
    }

    /// Source used by `$subquery` / `$leftquery`
    pub fn with_source(mut self, source: &'a dyn QuerySource) -> Self {
        self.source = Some(source);
        self
    }

    /// Parse a query against `model`.
    pub async fn parse(&self, model: &Model, query: &Query) -> DataResult<ParsedQuery> {
        let (filter, single) = self.shorthand(model, &query.filter)?;
        let filter = match &query.ids {
            Some(ids) => restrict_to_ids(filter, ids),
            None => filter,
        };
        let filter = self.resolve_filter(model, filter).await?;

        let mut warnings = Vec::new();
        let options = self.options(model, query, single, &mut warnings);
        Ok(ParsedQuery {
            filter,
            options,
            warnings,
            single,
        })
    }

    /// Run the relational passes, then coercion, over a filter of `model`.
    pub fn resolve_filter<'b>(
        &'b self,
        model: &'b Model,
        filter: Value,
    ) -> BoxFuture<'b, DataResult<Value>> {
        async move {
            let filter = self.rewrite_subqueries(model, filter).await?;
            let filter = self.rewrite_leftqueries(model, filter).await?;
            coerce_filter(model, &filter)
        }
        .boxed()
    }

    /// Expand a string shorthand into an equality filter.
    ///
    /// Returns whether the filter addresses a single record.
    fn shorthand(&self, model: &Model, filter: &Value) -> DataResult<(Value, bool)> {
        match filter {
            Value::Null => Ok((Value::Object(Map::new()), false)),
            Value::Object(_) => Ok((filter.clone(), false)),
            Value::String(key) if is_identifier(key) => Ok((json!({ "_id": key }), true)),
            Value::String(key) if model.key_property() == "_id" => Err(DataError::query(format!(
                "'{}' is not a valid identifier for model '{}'",
                key,
                model.slug()
            ))),
            Value::String(key) => {
                let mut map = Map::new();
                map.insert(model.key_property().to_string(), Value::String(key.clone()));
                Ok((Value::Object(map), true))
            }
            other => Err(DataError::query(format!(
                "filter must be an object or a string, got {}",
                other
            ))),
        }
    }

    fn source(&self) -> DataResult<&'a dyn QuerySource> {
        self.source
            .ok_or_else(|| DataError::internal("relational filter needs a record source"))
    }

    async fn rewrite_subqueries(&self, model: &Model, mut filter: Value) -> DataResult<Value> {
        for site in find_sites(&filter, SUBQUERY) {
            let property = model.property(&site.path).ok_or_else(|| {
                DataError::schema(format!(
                    "{} on '{}', which model '{}' does not declare",
                    SUBQUERY,
                    site.path,
                    model.slug()
                ))
            })?;
            let target_slug = property.relation_target().ok_or_else(|| {
                DataError::schema(format!(
                    "{} on '{}.{}', which is not a relation",
                    SUBQUERY,
                    model.slug(),
                    site.path
                ))
            })?;
            let target = self.registry.get(target_slug)?;

            let (inner, _) = self.shorthand(&target, &site.argument)?;
            let inner = self.resolve_filter(&target, inner).await?;
            let records = self.source()?.find(&target, inner).await?;

            let mut ids = Vec::new();
            for record in &records {
                if let Some(id) = record.get("_id") {
                    related_ids(id, &mut ids);
                }
            }
            debug!(
                target: "vaultbase::query",
                model = model.slug(),
                path = %site.path,
                target = target_slug,
                matched = ids.len(),
                "subquery resolved"
            );
            replace_with_in(&mut filter, &site, ids)?;
        }
        Ok(filter)
    }

    async fn rewrite_leftqueries(&self, model: &Model, mut filter: Value) -> DataResult<Value> {
        for site in find_sites(&filter, LEFTQUERY) {
            let left: LeftQuery = serde_json::from_value(site.argument.clone())
                .map_err(|e| DataError::query(format!("{} on '{}': {}", LEFTQUERY, site.path, e)))?;
            let from = self.registry.get(&left.from)?;

            let points_back = from
                .property(&left.property)
                .map_or(false, |p| p.relation_target() == Some(model.slug()));
            if !points_back {
                return Err(DataError::schema(format!(
                    "{}: '{}.{}' is not a relation to '{}'",
                    LEFTQUERY,
                    left.from,
                    left.property,
                    model.slug()
                )));
            }

            let (inner, _) = self.shorthand(&from, &left.filter)?;
            let inner = self.resolve_filter(&from, inner).await?;
            let records = self.source()?.find(&from, inner).await?;

            let mut values = Vec::new();
            for record in &records {
                for value in collect_path(record, &left.property) {
                    related_ids(value, &mut values);
                }
            }
            debug!(
                target: "vaultbase::query",
                model = model.slug(),
                path = %site.path,
                from = %left.from,
                matched = values.len(),
                "leftquery resolved"
            );
            replace_with_in(&mut filter, &site, values)?;
        }
        Ok(filter)
    }

    fn options(
        &self,
        model: &Model,
        query: &Query,
        single: bool,
        warnings: &mut Vec<String>,
    ) -> FindOptions {
        let requested = match (query.limit, query.page_size) {
            (Some(limit), Some(size)) => Some(limit.min(size)),
            (limit, size) => limit.or(size),
        };
        let requested = if single { Some(1) } else { requested };

        let max = self.config.max_limit;
        let limit = match requested {
            Some(limit) if limit > max => {
                warn!(
                    target: "vaultbase::query",
                    model = model.slug(),
                    requested = limit,
                    max,
                    "limit capped"
                );
                warnings.push(format!(
                    "Partial content: limit {} exceeds the maximum of {}",
                    limit, max
                ));
                max
            }
            Some(limit) => limit,
            None => max,
        };

        let page_offset = match (query.page, query.page_size) {
            (Some(page), Some(size)) => page.saturating_sub(1).saturating_mul(size),
            _ => 0,
        };

        FindOptions {
            sort: query.sort.clone(),
            limit: Some(limit),
            skip: query.skip.unwrap_or(0).saturating_add(page_offset),
        }
    }
}

/// AND an identifier allow-list with a filter, as two separate clauses.
fn restrict_to_ids(filter: Value, ids: &[String]) -> Value {
    let allow = json!({ "_id": { "$in": ids } });
    match &filter {
        Value::Object(map) if map.is_empty() => allow,
        _ => json!({ "$and": [filter, allow] }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{PropertyDef, PropertyKinds};
    use crate::schema::ModelConfig;
    use std::sync::Mutex;

    /// Source answering from fixed records, recording every lookup
    struct Fixture {
        records: Vec<(String, Value)>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl QuerySource for Fixture {
        fn find<'a>(
            &'a self,
            model: &'a Model,
            filter: Value,
        ) -> BoxFuture<'a, DataResult<Vec<Value>>> {
            async move {
                self.calls.lock().unwrap().push((model.slug().to_string(), filter.clone()));
                let mut out = Vec::new();
                for (slug, record) in &self.records {
                    if slug == model.slug()
                        && crate::storage::FilterMatcher::matches(record, &filter)?
                    {
                        out.push(record.clone());
                    }
                }
                Ok(out)
            }
            .boxed()
        }
    }

    fn registry() -> ModelRegistry {
        let kinds = PropertyKinds::builtin();
        let registry = ModelRegistry::new();
        for config in [
            ModelConfig::new("roles")
                .property("name", PropertyDef::text())
                .key_property("name"),
            ModelConfig::new("accounts")
                .property("_email", PropertyDef::text())
                .property("role", PropertyDef::relation("roles")),
            ModelConfig::new("posts")
                .property("title", PropertyDef::text())
                .property("views", PropertyDef::integer())
                .property("author", PropertyDef::relation("accounts"))
                .property("tags", PropertyDef::array(PropertyDef::relation("tags"))),
            ModelConfig::new("tags").property("label", PropertyDef::text()),
        ] {
            registry.define(Model::bind(config, &kinds).unwrap()).unwrap();
        }
        registry
    }

    fn fixture() -> Fixture {
        Fixture {
            records: vec![
                ("accounts".into(), json!({"_id": "acc1", "_email": "a@b.com", "role": "role1"})),
                ("accounts".into(), json!({"_id": "acc2", "_email": "c@d.com", "role": "role2"})),
                ("tags".into(), json!({"_id": "t1", "label": "rust"})),
                ("tags".into(), json!({"_id": "t2", "label": "go"})),
            ],
            calls: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_identifier_shorthand() {
        let registry = registry();
        let config = DataConfig::default();
        let parser = QueryParser::new(&registry, &config);
        let posts = registry.get("posts").unwrap();

        let parsed = parser
            .parse(&posts, &Query::by_key("507f1f77bcf86cd799439011"))
            .await
            .unwrap();
        assert_eq!(parsed.filter, json!({"_id": "507f1f77bcf86cd799439011"}));
        assert_eq!(parsed.options.limit, Some(1));
        assert!(parsed.single);

        let err = parser.parse(&posts, &Query::by_key("welcome")).await.unwrap_err();
        assert!(matches!(err, DataError::Query(_)));
    }

    #[tokio::test]
    async fn test_key_property_shorthand() {
        let registry = registry();
        let config = DataConfig::default();
        let parser = QueryParser::new(&registry, &config);
        let roles = registry.get("roles").unwrap();

        let parsed = parser.parse(&roles, &Query::by_key("admin")).await.unwrap();
        assert_eq!(parsed.filter, json!({"name": "admin"}));
        assert_eq!(parsed.options.limit, Some(1));
    }

    #[tokio::test]
    async fn test_ids_are_anded_with_filter() {
        let registry = registry();
        let config = DataConfig::default();
        let parser = QueryParser::new(&registry, &config);
        let posts = registry.get("posts").unwrap();

        let parsed = parser
            .parse(&posts, &Query::filter(json!({"views": "3"})).with_ids(["a", "b"]))
            .await
            .unwrap();
        assert_eq!(
            parsed.filter,
            json!({"$and": [{"views": 3}, {"_id": {"$in": ["a", "b"]}}]})
        );

        let only_ids = parser.parse(&posts, &Query::by_ids(["a"])).await.unwrap();
        assert_eq!(only_ids.filter, json!({"_id": {"$in": ["a"]}}));
    }

    #[tokio::test]
    async fn test_paging_and_limit_cap() {
        let registry = registry();
        let config = DataConfig::default();
        let parser = QueryParser::new(&registry, &config);
        let posts = registry.get("posts").unwrap();

        let paged = parser
            .parse(&posts, &Query::new().with_limit(50).with_page(3, 20))
            .await
            .unwrap();
        assert_eq!(paged.options.limit, Some(20));
        assert_eq!(paged.options.skip, 40);
        assert!(paged.warnings.is_empty());

        let capped = parser.parse(&posts, &Query::new().with_limit(5000)).await.unwrap();
        assert_eq!(capped.options.limit, Some(1000));
        assert_eq!(capped.warnings.len(), 1);
        assert!(capped.warnings[0].starts_with("Partial content"));
    }

    #[tokio::test]
    async fn test_subquery_becomes_id_list() {
        let registry = registry();
        let config = DataConfig::default();
        let source = fixture();
        let parser = QueryParser::new(&registry, &config).with_source(&source);
        let posts = registry.get("posts").unwrap();

        let parsed = parser
            .parse(&posts, &Query::filter(json!({"tags": {"$subquery": {"label": "rust"}}})))
            .await
            .unwrap();
        assert_eq!(parsed.filter, json!({"tags": {"$in": ["t1"]}}));
        assert_eq!(source.calls.lock().unwrap()[0].0, "tags");
    }

    #[tokio::test]
    async fn test_subquery_requires_relation() {
        let registry = registry();
        let config = DataConfig::default();
        let source = fixture();
        let parser = QueryParser::new(&registry, &config).with_source(&source);
        let posts = registry.get("posts").unwrap();

        let err = parser
            .parse(&posts, &Query::filter(json!({"title": {"$subquery": {}}})))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Schema(_)));
        assert!(source.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_leftquery_reads_relation_values() {
        let registry = registry();
        let config = DataConfig::default();
        let source = fixture();
        let parser = QueryParser::new(&registry, &config).with_source(&source);
        let roles = registry.get("roles").unwrap();

        let query = Query::filter(json!({
            "_id": {"$leftquery": {
                "from": "accounts",
                "filter": {"_email": "a@b.com"},
                "property": "role"
            }}
        }));
        let parsed = parser.parse(&roles, &query).await.unwrap();
        assert_eq!(parsed.filter, json!({"_id": {"$in": ["role1"]}}));
    }

    #[tokio::test]
    async fn test_leftquery_must_point_back() {
        let registry = registry();
        let config = DataConfig::default();
        let source = fixture();
        let parser = QueryParser::new(&registry, &config).with_source(&source);
        let tags = registry.get("tags").unwrap();

        let query = Query::filter(json!({
            "_id": {"$leftquery": {"from": "accounts", "filter": {}, "property": "role"}}
        }));
        let err = parser.parse(&tags, &query).await.unwrap_err();
        assert!(matches!(err, DataError::Schema(_)));
    }
}
